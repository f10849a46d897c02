use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use attachment_store::config;
use attachment_store::drivers::create_backend;
use attachment_store::storage::{
    FileMetadata, ObjectStore, PresignOptions, TransferSource, UploadOptions, UrlOptions,
};

const USAGE: &str = "\
usage: attachment-store [--config <path>] <command> [args]

commands:
  upload <file> [id]          upload a local file (id defaults to a random uuid + extension)
  download <id> <dest>        download an object to a local file
  url <id> [--download] [--public] [--expires <secs>] [--host <url>]
  presign <id> [--put] [--expires <secs>] [--content-type <type>]
  exists <id>
  delete <id>...
  delete-prefixed <prefix>
  clear
  version";

/// Split `--flag [value]` options from positional arguments / 解析命令行参数
struct Args {
    positional: Vec<String>,
    flags: Vec<(String, Option<String>)>,
}

const VALUE_FLAGS: &[&str] = &["--config", "--expires", "--host", "--content-type"];

impl Args {
    fn parse(raw: impl Iterator<Item = String>) -> Result<Self> {
        let mut positional = Vec::new();
        let mut flags = Vec::new();
        let mut raw = raw.peekable();
        while let Some(arg) = raw.next() {
            if VALUE_FLAGS.contains(&arg.as_str()) {
                let value = raw.next().ok_or_else(|| anyhow!("{} needs a value", arg))?;
                flags.push((arg, Some(value)));
            } else if arg.starts_with("--") {
                flags.push((arg, None));
            } else {
                positional.push(arg);
            }
        }
        Ok(Self { positional, flags })
    }

    fn has(&self, flag: &str) -> bool {
        self.flags.iter().any(|(name, _)| name == flag)
    }

    fn value(&self, flag: &str) -> Option<&str> {
        self.flags
            .iter()
            .find(|(name, _)| name == flag)
            .and_then(|(_, value)| value.as_deref())
    }

    fn expires(&self) -> Result<Option<u32>> {
        self.value("--expires")
            .map(|v| v.parse::<u32>().with_context(|| format!("invalid --expires {}", v)))
            .transpose()
    }

    fn arg(&self, index: usize, name: &str) -> Result<&str> {
        self.positional
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("missing <{}>\n\n{}", name, USAGE))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attachment_store=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse(std::env::args().skip(1))?;
    let Some(command) = args.positional.first().cloned() else {
        println!("{}", USAGE);
        return Ok(());
    };

    if command == "version" {
        println!("attachment-store {} (built {})", env!("CARGO_PKG_VERSION"), env!("BUILD_TIME"));
        return Ok(());
    }

    // Load configuration / 加载配置
    let config_path = args
        .value("--config")
        .map(PathBuf::from)
        .unwrap_or_else(config::get_config_path);
    let app_config = config::load_config(&config_path)?;
    let backend = create_backend(&app_config)?;
    let store = ObjectStore::new(backend, app_config.storage)?;

    match command.as_str() {
        "upload" => upload(&store, &args).await?,
        "download" => {
            let id = args.arg(1, "id")?;
            let dest = args.arg(2, "dest")?;
            let downloaded = store.download(id).await?;
            println!(
                "{} bytes, content-type {}",
                downloaded.size(),
                downloaded.content_type().unwrap_or("unknown")
            );
            downloaded.persist(Path::new(dest))?;
        }
        "url" => {
            let id = args.arg(1, "id")?;
            let mut options = if args.has("--download") { UrlOptions::download() } else { UrlOptions::default() };
            if args.has("--public") {
                options.public = Some(true);
            }
            options.host = args.value("--host").map(str::to_string);
            options.expires_in = args.expires()?;
            println!("{}", store.url(id, &options).await?);
        }
        "presign" => {
            let id = args.arg(1, "id")?;
            let mut options = if args.has("--put") { PresignOptions::put() } else { PresignOptions::default() };
            options.expires_in = args.expires()?;
            if let Some(content_type) = args.value("--content-type") {
                options = options.field("content_type", content_type);
            }
            let credential = store.presign(id, &options).await?;
            println!("{}", serde_json::to_string_pretty(&credential)?);
        }
        "exists" => {
            let id = args.arg(1, "id")?;
            let exists = store.exists(id).await?;
            println!("{}", exists);
            if !exists {
                std::process::exit(1);
            }
        }
        "delete" => {
            let ids = &args.positional[1..];
            match ids {
                [] => bail!("missing <id>\n\n{}", USAGE),
                [id] => store.delete(id).await?,
                _ => store.delete_all(ids).await?,
            }
        }
        "delete-prefixed" => store.delete_prefixed(args.arg(1, "prefix")?).await?,
        "clear" => store.clear().await?,
        other => bail!("unknown command: {}\n\n{}", other, USAGE),
    }

    Ok(())
}

async fn upload(store: &ObjectStore, args: &Args) -> Result<()> {
    let file = PathBuf::from(args.arg(1, "file")?);
    let filename = file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("invalid file name: {:?}", file))?;

    let id = match args.positional.get(2) {
        Some(id) => id.clone(),
        None => match file.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("{}.{}", uuid::Uuid::new_v4().simple(), ext),
            None => uuid::Uuid::new_v4().simple().to_string(),
        },
    };

    let mime = mime_guess::from_path(&file).first_or_octet_stream();
    let metadata = FileMetadata::new(Some(mime.as_ref()), Some(filename));

    let plan = store
        .upload(TransferSource::File(file.clone()), &id, &metadata, &UploadOptions::new())
        .await
        .with_context(|| format!("uploading {:?}", file))?;

    tracing::info!("upload finished: {:?}", plan);
    println!("{}", id);
    Ok(())
}
