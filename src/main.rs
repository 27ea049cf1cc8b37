use anyhow::Result;

mod cmd;

fn main() -> Result<()> {
    let matches = cmd::app().get_matches();

    let filter = if *matches.get_one::<bool>("verbose").unwrap() {
        "debug"
    } else {
        "info"
    };
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, filter),
    );

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(cmd::run(matches))
}
