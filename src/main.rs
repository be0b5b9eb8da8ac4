use std::{
    error::Error,
    path::{Path, PathBuf},
};

use firewall_server::{
    build_rocket,
    config::ServerConfig,
    database::FirewallDbPool,
    logger::*,
};
use rand::RngCore;
use rocket::http::Method;
use tokio::io::AsyncWriteExt;

fn abort_misconfig() -> ! {
    error!("aborting launch due to misconfiguration.");
    std::process::exit(1);
}

fn gen_secret_key() -> String {
    let mut buf = [0u8; 32];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

#[rocket::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // setup logger

    let write_to_file = std::env::var("FIREWALL_NO_FILE_LOG")
        .map(|p| p.parse::<i32>().unwrap_or(0))
        .unwrap_or(0)
        == 0;

    log::set_logger(Logger::instance("firewall_server", write_to_file)).unwrap();

    if let Some(log_level) = get_log_level("FIREWALL_LOG_LEVEL") {
        log::set_max_level(log_level);
    } else {
        log::set_max_level(LogLevelFilter::Warn);
        error!("invalid value for the log level environment variable");
        warn!("hint: possible values are 'trace', 'debug', 'info', 'warn', 'error', and 'none'.");
        abort_misconfig();
    }

    // create Rocket.toml if it doesn't exist
    let rocket_toml = std::env::var("ROCKET_CONFIG").map_or_else(
        |_| std::env::current_dir().unwrap().join("Rocket.toml"),
        PathBuf::from,
    );

    if rocket_toml.file_name().is_none_or(|x| x != "Rocket.toml")
        || !rocket_toml.parent().is_some_and(Path::exists)
    {
        error!("invalid value for ROCKET_CONFIG");
        warn!("hint: the filename must be 'Rocket.toml' and the parent folder must exist on the disk");
        abort_misconfig();
    }

    if !rocket_toml.exists() {
        info!("Creating a template Rocket.toml file");
        let mut file = tokio::fs::File::create(rocket_toml).await?;

        let data = include_str!("misc/Rocket.toml.template").to_owned();
        let data = data.replace("$$ROCKET_SECRET_KEY$$", &gen_secret_key());

        file.write_all(data.as_bytes()).await?;
    }

    // config file

    let mut config_path =
        std::env::var("FIREWALL_CONFIG_PATH").map_or_else(|_| std::env::current_dir().unwrap(), PathBuf::from);

    if config_path.is_dir() {
        config_path = config_path.join("config.json");
    }

    let config = if config_path.exists() && config_path.is_file() {
        match ServerConfig::load(&config_path) {
            Ok(x) => x,
            Err(err) => {
                error!("failed to open/parse configuration file: {err}");
                warn!(
                    "hint: if you don't have anything important there, delete the file for a new template to be created."
                );
                warn!("hint: the faulty configuration resides at: {config_path:?}");
                abort_misconfig();
            }
        }
    } else {
        info!("Configuration file does not exist by given path, creating a template one.");

        let conf = ServerConfig::default();
        conf.save(&config_path)?;

        conf
    };

    if config.protected_prefixes.iter().any(|p| !p.starts_with('/')) {
        error!("invalid protected_prefixes entry in the config file");
        warn!("hint: every protected prefix must be an absolute path, for example \"/v1\"");
        abort_misconfig();
    }

    // database

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "db.sqlite".to_owned());

    let pool = match FirewallDbPool::from_url(&database_url) {
        Ok(x) => x,
        Err(err) => {
            error!("failed to initialize the database: {err}");
            warn!("hint: the database path is taken from the DATABASE_URL environment variable");
            abort_misconfig();
        }
    };

    // start rocket

    let mut rocket = build_rocket(&config, pool);

    if std::env::var("FIREWALL_DISABLE_CORS").map_or(false, |x| x.parse::<i32>().unwrap_or(0) != 0) {
        warn!("CORS is disabled, this is not recommended for production use");
    } else {
        rocket = rocket.attach(
            rocket_cors::CorsOptions::default()
                .allowed_origins(rocket_cors::AllowedOrigins::all())
                .allowed_methods(
                    vec![
                        Method::Get,
                        Method::Post,
                        Method::Put,
                        Method::Delete,
                        Method::Options,
                    ]
                    .into_iter()
                    .map(From::from)
                    .collect(),
                )
                .allow_credentials(true)
                .to_cors()?,
        );
    }

    rocket.launch().await?;

    Ok(())
}
