use crate::client::MultiTenantClient;
use crate::config::ConnectOptions;
use crate::models;
use clap::{Arg, Command};

pub fn cli() -> Command {
    Command::new("mongodactyl").subcommand(
        Command::new("check-connection")
            .about("Open a client, bind every model on one database and count its documents")
            .arg(
                Arg::new("url")
                    .long("url")
                    .help("MongoDB connection string (defaults to DATABASE_URL or MONGODB_URL)")
                    .value_name("URL"),
            )
            .arg(
                Arg::new("db")
                    .long("db")
                    .help("Tenant database to bind the models on")
                    .value_name("DB")
                    .default_value("test_database"),
            ),
    )
}

pub async fn handle_cli() -> Result<(), Box<dyn std::error::Error>> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("check-connection", sub_matches)) => {
            let url = match sub_matches.get_one::<String>("url") {
                Some(url) => url.clone(),
                None => database_url()?,
            };
            let db = sub_matches
                .get_one::<String>("db")
                .cloned()
                .unwrap_or_else(|| "test_database".to_string());

            let client =
                MultiTenantClient::connect(&url, models::all(), ConnectOptions::default()).await?;
            let tenant = client.use_database(&db).await?;

            println!("Connected to {}", url);
            for alias in tenant.aliases() {
                let model = tenant.model(alias)?;
                let count = model.count_documents(Default::default()).await?;
                println!(
                    "{}.{} ({}): {} documents",
                    db,
                    model.collection_name(),
                    alias,
                    count
                );
            }

            if let Err(e) = client.close(true).await {
                eprintln!("Failed to close connections: {}", e);
                std::process::exit(1);
            }
        }
        _ => {
            cli().print_help()?;
        }
    }

    Ok(())
}

/// Connection string from the environment, `.env` included.
pub fn database_url() -> Result<String, std::env::VarError> {
    dotenvy::dotenv().ok();

    std::env::var("DATABASE_URL").or_else(|_| std::env::var("MONGODB_URL"))
}
