use sleep_detection::{config, run_app, telemetry};

fn main() -> anyhow::Result<()> {
    let config = config::get_configuration()?;
    telemetry::init_subscriber(&config.log_level);

    run_app(config)?;

    Ok(())
}
