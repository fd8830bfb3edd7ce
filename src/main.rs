//! scheme-loader command line.
//!
//! # Architecture Overview
//!
//! ```text
//!   fetch <url>
//!       │
//!       ▼
//!   Session ──▶ ClientRequest ──▶ Controller
//!                                    ├─ --map scheme=dir → protocol (file type)
//!                                    ├─ file:            → file transport
//!                                    └─ http(s):         → network transport
//!       ▲                                   │
//!       └────────── RequestEvent ◀──────────┘
//!   status + headers → stderr, body → stdout
//! ```

use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;

use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use percent_encoding::percent_decode_str;
use tokio::io::AsyncWriteExt;

use scheme_loader::config::{load_config, LoaderConfig};
use scheme_loader::http::RequestDescriptor;
use scheme_loader::observability::{logging, metrics};
use scheme_loader::{ProtocolResponse, ProtocolType, RedirectMode, RequestEvent, RequestOptions, Responder, Session};

#[derive(Parser)]
#[command(name = "scheme-loader")]
#[command(about = "Fetch URLs through the scheme-loader pipeline", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a URL and write its body to stdout
    Fetch {
        url: String,

        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Extra header, `name: value`
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request body
        #[arg(short, long)]
        data: Option<String>,

        #[arg(long, value_enum, default_value_t = RedirectArg::Follow)]
        redirect: RedirectArg,

        /// Serve `scheme://` URLs from a directory, `scheme=dir`
        #[arg(long = "map")]
        maps: Vec<String>,
    },
    /// Load and validate a configuration file
    CheckConfig { path: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum RedirectArg {
    Follow,
    Error,
    Manual,
}

impl From<RedirectArg> for RedirectMode {
    fn from(arg: RedirectArg) -> Self {
        match arg {
            RedirectArg::Follow => RedirectMode::Follow,
            RedirectArg::Error => RedirectMode::Error,
            RedirectArg::Manual => RedirectMode::Manual,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => LoaderConfig::default(),
    };

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("Error: failed to initialize logging: {}", e);
    }
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let result = match cli.command {
        Commands::CheckConfig { path } => check_config(&path),
        Commands::Fetch {
            url,
            method,
            headers,
            data,
            redirect,
            maps,
        } => {
            let options = RequestOptions::new(url)
                .method(method)
                .redirect(redirect.into());
            fetch(config, options, headers, data, maps).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn check_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    println!(
        "{}: ok (pipe {} bytes, {} redirects, {} connections)",
        path.display(),
        config.pipe.capacity_bytes,
        config.redirects.max_redirects,
        config.network.max_connections
    );
    Ok(())
}

async fn fetch(
    config: LoaderConfig,
    mut options: RequestOptions,
    headers: Vec<String>,
    data: Option<String>,
    maps: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = Session::new(config);

    for map in &maps {
        register_map(&session, map)?;
    }

    for header in &headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| format!("invalid header '{}', expected 'name: value'", header))?;
        options = options.header(name.trim(), value.trim());
    }

    let mut request = session.request(options)?;
    request.end(data.map(Bytes::from))?;

    let mut stdout = tokio::io::stdout();
    let mut failure = None;
    while let Some(event) = request.next_event().await {
        match event {
            RequestEvent::Response(info) => {
                eprintln!("HTTP/{} {} {}", info.http_version, info.status.as_u16(), info.status_text);
                for (name, value) in &info.headers {
                    eprintln!("{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
                }
                eprintln!();
            }
            RequestEvent::Redirect { status, url, .. } => {
                eprintln!("* redirect {} -> {}", status.as_u16(), url);
                if request.follow_redirect().is_ok() {
                    tracing::debug!(url = %url, "Following manual redirect");
                }
            }
            RequestEvent::Login { challenge, callback } => {
                eprintln!("* {} requires {} credentials", challenge.host, challenge.scheme);
                callback.respond(None);
            }
            RequestEvent::Data(chunk) => stdout.write_all(&chunk).await?,
            RequestEvent::Error(e) => failure = Some(e.to_string()),
            RequestEvent::Abort => failure = Some("aborted".to_string()),
            RequestEvent::Close => break,
            _ => {}
        }
    }
    stdout.flush().await?;

    match failure {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}

/// Register a file-type handler serving `scheme://` URLs from `dir`.
fn register_map(session: &Session, arg: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (scheme, root) = parse_map(arg)?;
    session.protocol().register_protocol(
        &scheme,
        ProtocolType::File,
        move |request: RequestDescriptor, responder: Responder| {
            let response = match resolve_under(&root, &request) {
                Some(path) => ProtocolResponse::new().path(path),
                None => ProtocolResponse::error(scheme_loader::NetError::FileNotFound),
            };
            let _ = responder.respond(response);
        },
    )?;
    Ok(())
}

/// Split `scheme=dir` and make `dir` absolute.
fn parse_map(arg: &str) -> Result<(String, PathBuf), String> {
    let (scheme, dir) = arg
        .split_once('=')
        .ok_or_else(|| format!("invalid --map '{}', expected scheme=dir", arg))?;
    let root = std::fs::canonicalize(dir).map_err(|e| format!("--map '{}': {}", arg, e))?;
    Ok((scheme.to_string(), root))
}

/// Map `scheme://host/a/b` to `root/host/a/b`, refusing to leave `root`.
/// Path segments are percent-decoded before they touch the filesystem.
fn resolve_under(root: &Path, request: &RequestDescriptor) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    if let Some(host) = request.url.host_str() {
        path.push(safe_segment(host)?);
    }
    for segment in request.url.path_segments()? {
        let segment = percent_decode_str(segment).decode_utf8().ok()?;
        match segment.as_ref() {
            "" | "." => {}
            ".." => return None,
            part => path.push(safe_segment(part)?),
        }
    }
    Some(path)
}

/// A single normal path component, or `None`.
fn safe_segment(part: &str) -> Option<&str> {
    let mut components = Path::new(part).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !part.contains(['/', '\\', '\0']) => Some(part),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use scheme_loader::LoaderConfig;
    use url::Url;

    fn descriptor(url: &str) -> RequestDescriptor {
        RequestDescriptor::new(http::Method::GET, Url::parse(url).unwrap())
    }

    #[test]
    fn resolves_percent_encoded_segments() {
        let root = Path::new("/srv/site");
        let path = resolve_under(root, &descriptor("app://docs/a%20b/c.html")).unwrap();
        assert_eq!(path, Path::new("/srv/site/docs/a b/c.html"));
    }

    #[test]
    fn refuses_to_leave_root() {
        let root = Path::new("/srv/site");
        assert!(resolve_under(root, &descriptor("app://docs/..%2F..%2Fetc%2Fpasswd")).is_none());
        assert!(resolve_under(root, &descriptor("app://docs/a%2Fb")).is_none());
    }

    #[test]
    fn map_root_is_made_absolute() {
        let (scheme, root) = parse_map("app=.").unwrap();
        assert_eq!(scheme, "app");
        assert!(root.is_absolute());
        assert_eq!(root, std::env::current_dir().unwrap().canonicalize().unwrap());

        assert!(parse_map("app").is_err());
        assert!(parse_map("app=/definitely/not/here").is_err());
    }

    #[tokio::test]
    async fn mapped_scheme_serves_decoded_file_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("site")).unwrap();
        std::fs::write(dir.path().join("site").join("a b.txt"), "spaced").unwrap();

        let session = Session::new(LoaderConfig::default());
        register_map(&session, &format!("app={}", dir.path().display())).unwrap();

        let mut request = session
            .request(RequestOptions::new("app://site/a%20b.txt"))
            .unwrap();
        request.end(None).unwrap();

        let mut body = Vec::new();
        let mut status = None;
        while let Some(event) = request.next_event().await {
            match event {
                RequestEvent::Response(info) => status = Some(info.status.as_u16()),
                RequestEvent::Data(chunk) => body.extend_from_slice(&chunk),
                RequestEvent::Error(e) => panic!("unexpected error: {}", e),
                _ => {}
            }
        }
        assert_eq!(status, Some(200));
        assert_eq!(body, b"spaced");
    }
}
