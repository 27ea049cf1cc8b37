use std::path::{Path, PathBuf};

use log::debug;

use crate::{
    config::DeviceConfig,
    error::{Error, Result},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub number: usize,
    pub key: String,
    pub path: PathBuf,
}

impl Entry {
    pub async fn load(&self) -> Result<DeviceConfig> {
        DeviceConfig::load(&self.path).await
    }
}

/// Device files found in one directory, numbered from 1 in file name order.
#[derive(Debug, Clone, Default)]
pub struct DeviceLibrary {
    dir: PathBuf,
    entries: Vec<Entry>,
}

impl DeviceLibrary {
    /// Scan `dir` for `*.json` device files. A missing directory is an empty library.
    pub async fn scan<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut res = DeviceLibrary {
            dir: dir.clone(),
            entries: Vec::new(),
        };

        let mut read = match tokio::fs::read_dir(&dir).await {
            Ok(x) => x,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("device directory {} does not exist", dir.display());
                return Ok(res);
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "failed to read {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = read
            .next_entry()
            .await
            .map_err(|e| Error::Config(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|x| x.to_str()) != Some("json") {
                continue;
            }
            if let Some(key) = path.file_stem().and_then(|x| x.to_str()) {
                files.push((key.to_string(), path.clone()));
            }
        }
        files.sort();

        res.entries = files
            .into_iter()
            .enumerate()
            .map(|(idx, (key, path))| Entry {
                number: idx + 1,
                key,
                path,
            })
            .collect();
        Ok(res)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the file whose device advertises as `name`. Unreadable files are skipped.
    pub async fn find_by_name(&self, name: &str) -> Option<&Entry> {
        for entry in self.entries.iter() {
            match entry.load().await {
                Ok(config) if config.name == name => return Some(entry),
                Ok(_) => {}
                Err(e) => debug!("skipping {}: {}", entry.path.display(), e),
            }
        }
        None
    }

    /// Find a device by its number or file stem.
    pub fn resolve(&self, arg: &str) -> Option<&Entry> {
        if let Ok(number) = arg.parse::<usize>() {
            if let Some(x) = self.entries.iter().find(|x| x.number == number) {
                return Some(x);
            }
        }
        self.entries.iter().find(|x| x.key == arg)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const HEART: &str = r#"{"name":"HR-Sim","services":[{"uuid":"180d","characteristics":[
        {"uuid":"2a37","name":"hr","properties":["notify"],"encoder":{"type":"heart-rate"}}]}]}"#;

    #[tokio::test]
    async fn scan_sorted_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("weight.json"), HEART).unwrap();
        std::fs::write(dir.path().join("heart.json"), HEART).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let library = DeviceLibrary::scan(dir.path()).await.unwrap();
        let keys: Vec<_> = library.entries().iter().map(|x| x.key.as_str()).collect();
        assert_eq!(keys, vec!["heart", "weight"]);

        assert_eq!(library.resolve("2").unwrap().key, "weight");
        assert_eq!(library.resolve("heart").unwrap().number, 1);
        assert!(library.resolve("3").is_none());
        assert!(library.resolve("scale").is_none());

        let config = library.resolve("1").unwrap().load().await.unwrap();
        assert_eq!(config.name, "HR-Sim");
    }

    #[tokio::test]
    async fn find_by_advertised_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();
        std::fs::write(dir.path().join("heart-rate.json"), HEART).unwrap();

        let library = DeviceLibrary::scan(dir.path()).await.unwrap();
        assert_eq!(library.find_by_name("HR-Sim").await.unwrap().key, "heart-rate");
        assert!(library.find_by_name("heart-rate").await.is_none());
    }

    #[tokio::test]
    async fn rescan_sees_new_files() {
        let dir = tempfile::tempdir().unwrap();
        let library = DeviceLibrary::scan(dir.path()).await.unwrap();
        assert!(library.is_empty());

        std::fs::write(dir.path().join("heart.json"), HEART).unwrap();
        let library = DeviceLibrary::scan(library.dir()).await.unwrap();
        assert_eq!(library.resolve("1").unwrap().key, "heart");
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let library = DeviceLibrary::scan(dir.path().join("configs")).await.unwrap();
        assert!(library.is_empty());
    }
}
