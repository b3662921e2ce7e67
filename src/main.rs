use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use file_index::{FileIndex, FileSelectAction, IndexOptions};
use http::Method;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// --- Configuration ---
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The root directory to serve files from
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    root_dir: PathBuf,

    /// The network address to bind to
    #[arg(short, long, value_name = "ADDR", default_value = "127.0.0.1:3000")]
    bind_addr: SocketAddr,

    /// Label of the root breadcrumb (defaults to the request host)
    #[arg(long, value_name = "NAME")]
    server_name: Option<String>,

    /// Name prefixes hidden from listings
    #[arg(long = "hide", value_name = "PREFIX", default_values_t = [".".to_string(), "_".to_string()])]
    hidden_prefixes: Vec<String>,

    /// Show recursive sizes and modification times for folders
    #[arg(long)]
    deep_stats: bool,

    /// Allow `?format=json`
    #[arg(long)]
    json: bool,

    /// Refuse `?format=zip` folder downloads
    #[arg(long)]
    no_zip: bool,

    /// Deflate level for zip downloads, 0 stores files uncompressed
    #[arg(long, value_name = "LEVEL", default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=9))]
    compression_level: u8,

    /// Disable clean alias paths
    #[arg(long)]
    no_aliases: bool,

    /// Generate alias paths in links whenever possible
    #[arg(long, conflicts_with = "no_aliases")]
    force_aliases: bool,

    /// What clicking a file in a listing does
    #[arg(long, value_enum, default_value = "default")]
    select_action: FileSelectAction,

    /// Show "2 hours ago" style times
    #[arg(long)]
    relative_times: bool,

    /// HTML document served for unknown paths
    #[arg(long, value_name = "FILE")]
    not_found_document: Option<PathBuf>,
}

impl Args {
    fn into_options(self) -> IndexOptions {
        IndexOptions {
            root_dir: self.root_dir,
            server_name: self.server_name,
            hidden_prefixes: self.hidden_prefixes,
            deep_stats: self.deep_stats,
            json_export: self.json,
            zip_downloads: !self.no_zip,
            zip_compression_level: self.compression_level,
            clean_aliases: !self.no_aliases,
            force_aliases: self.force_aliases,
            file_select_action: self.select_action,
            relative_times: self.relative_times,
            not_found_document: self.not_found_document,
            ..IndexOptions::default()
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let bind_addr = args.bind_addr;
    let index = match FileIndex::new(args.into_options()) {
        Ok(index) => index,
        Err(e) => {
            error!("{}. Exiting.", e);
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    info!("Serving files from: {}", index.root().display());
    info!("Listening on: {}", bind_addr);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD])
        .allow_origin(Any);

    let app = index
        .router()
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to address {}: {}", bind_addr, e);
            eprintln!("Error: Failed to bind to address {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_options() {
        let args = Args::parse_from([
            "file-index",
            "--root-dir",
            "/srv",
            "--json",
            "--no-zip",
            "--compression-level",
            "6",
            "--hide",
            "~",
            "--select-action",
            "render",
        ]);
        let options = args.into_options();
        assert_eq!(options.root_dir, PathBuf::from("/srv"));
        assert!(options.json_export);
        assert!(!options.zip_downloads);
        assert_eq!(options.zip_compression_level, 6);
        assert_eq!(options.hidden_prefixes, vec!["~".to_string()]);
        assert_eq!(options.file_select_action, FileSelectAction::Render);
        assert!(options.clean_aliases);
    }

    #[test]
    fn compression_level_is_bounded() {
        assert!(Args::try_parse_from(["file-index", "--compression-level", "12"]).is_err());
    }
}
