//! aenker: authenticated, chunked encryption for files and streams
//!
//! Commands:
//!   encrypt (e, seal)  - encrypt stdin or a file for a peer, a shared key or a password
//!   decrypt (d, open)  - authenticate and decrypt
//!   keygen             - generate an X25519 key pair
//!   pubkey             - print the public key of a private key
//!   pbkdf              - derive a key pair from a password and a salt string
//!   seal-mek           - seal a new media key under a key-encryption key
//!   open-mek           - open a sealed media key blob
//!   config show        - display the effective configuration
//!
//! Keys are 32 bytes, base64 encoded. Wherever a key is expected, either the
//! base64 string itself or the path of a file containing it may be given.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zeroize::Zeroizing;

use aenker_core::AenkerConfig;
use aenker_crypto::{
    derive_private_key, generate_private_key, open_mek, public_key, seal_new_mek, Aenker, Kek,
    OpeningKey, PublicKey, SealingKey, SecretString, StaticSecret,
};

/// Environment variable consulted before prompting for a password.
const PASSWORD_ENV: &str = "AENKER_PASSWORD";

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "aenker",
    version,
    about = "Authenticated, chunked file encryption",
    long_about = "aenker: encrypt files and streams in authenticated chunks for a \
                  shared key, a password, or a recipient's public key"
)]
struct Cli {
    /// Path to aenker.toml configuration file
    #[arg(long, short = 'c', env = "AENKER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "AENKER_LOG")]
    log: Option<String>,

    /// Log format (json, text)
    #[arg(long, env = "AENKER_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a file or stdin
    #[command(visible_aliases = ["e", "seal"])]
    Encrypt {
        /// Recipient's public key (base64 or key file)
        #[arg(long, short = 'p')]
        peer: Option<String>,
        /// Shared 32-byte symmetric key (base64 or key file)
        #[arg(long, short = 'k')]
        key_file: Option<String>,
        /// Derive the key from a password (prompted, or AENKER_PASSWORD)
        #[arg(long)]
        password: bool,
        #[command(flatten)]
        io: IoArgs,
    },

    /// Decrypt and authenticate a file or stdin
    #[command(visible_aliases = ["d", "open"])]
    Decrypt {
        /// Your private key (base64 or key file)
        #[arg(long, short = 'p')]
        private_key: Option<String>,
        /// Shared 32-byte symmetric key (base64 or key file)
        #[arg(long, short = 'k')]
        key_file: Option<String>,
        /// Derive the key from a password (prompted, or AENKER_PASSWORD)
        #[arg(long)]
        password: bool,
        #[command(flatten)]
        io: IoArgs,
    },

    /// Generate a new X25519 key pair
    Keygen {
        /// Write the private key to this file (mode 0600, never overwritten)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Write the public key to this file
        #[arg(long, short = 'p')]
        pubkey: Option<PathBuf>,
    },

    /// Print the public key belonging to a private key
    Pubkey {
        /// Private key (base64 or key file)
        private_key: String,
    },

    /// Derive a key pair from a password and a salt string
    Pbkdf {
        /// Salt string; the same password and salt always give the same key
        #[arg(long, short = 's', default_value = "aenker")]
        salt: String,
        /// Write the private key to this file (mode 0600, never overwritten)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Write the public key to this file
        #[arg(long, short = 'p')]
        pubkey: Option<PathBuf>,
    },

    /// Seal a new media key; the blob goes to the output, the key to stderr
    #[command(visible_alias = "sealmek")]
    SealMek {
        /// Key-encryption key (base64 or key file)
        #[arg(long, short = 'k')]
        key_file: String,
        /// Blob output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Open a sealed media key blob and print the media key
    #[command(visible_alias = "openmek")]
    OpenMek {
        /// Key-encryption key (base64 or key file)
        #[arg(long, short = 'k')]
        key_file: String,
        /// Blob input file (default: stdin)
        #[arg(long, short = 'i')]
        input: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug)]
struct IoArgs {
    /// Input file (default: stdin)
    #[arg(long, short = 'i')]
    input: Option<PathBuf>,
    /// Output file (default: stdout)
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    /// Plaintext chunk size, e.g. 1984, 16k, 1M (overrides config)
    #[arg(long, value_parser = parse_size)]
    chunk_size: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => AenkerConfig::load(path)
            .with_context(|| format!("loading config: {}", path.display()))?,
        None => None,
    };
    let config_found = loaded.is_some();
    let config = loaded.unwrap_or_default();

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| match config.log.format.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        });
    init_logging(&level, &format);

    if let (Some(path), false) = (&cli.config, config_found) {
        warn!(
            "config file not found: {}  (using defaults)",
            path.display()
        );
    }

    match cli.command {
        Commands::Encrypt { peer, key_file, password, io } => {
            let key = sealing_key(peer.as_deref(), key_file.as_deref(), password)?;
            cmd_encrypt(&config, &key, &io)
        }
        Commands::Decrypt { private_key, key_file, password, io } => {
            let key = opening_key(private_key.as_deref(), key_file.as_deref(), password)?;
            cmd_decrypt(&config, &key, &io)
        }
        Commands::Keygen { output, pubkey } => {
            let private = generate_private_key();
            emit_key_pair(&private, output.as_deref(), pubkey.as_deref(), "aenker keygen")
        }
        Commands::Pubkey { private_key } => cmd_pubkey(&private_key),
        Commands::Pbkdf { salt, output, pubkey } => {
            cmd_pbkdf(&salt, output.as_deref(), pubkey.as_deref())
        }
        Commands::SealMek { key_file, output } => cmd_seal_mek(&key_file, output.as_deref()),
        Commands::OpenMek { key_file, input } => {
            let mek = cmd_open_mek(&key_file, input.as_deref())?;
            println!("{}", *mek);
            Ok(())
        }
        Commands::Config { action: ConfigAction::Show } => {
            cmd_config_show(&config, cli.config.as_deref(), config_found)
        }
    }
}

/// Logs go to stderr: stdout may carry ciphertext or plaintext.
fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}

// ── Key material ──────────────────────────────────────────────────────────────

/// Decode a single base64 line holding exactly 32 bytes.
fn decode_key(text: &str) -> Option<[u8; 32]> {
    let text = text.trim();
    if text.len() != 44 || !text.ends_with('=') {
        return None;
    }
    let bytes = Zeroizing::new(BASE64.decode(text).ok()?);
    bytes.as_slice().try_into().ok()
}

/// Accept a base64 key directly, or read the first key line from a file.
/// Other lines in key files (comments) are skipped.
fn read_key(arg: &str) -> Result<[u8; 32]> {
    if let Some(key) = decode_key(arg) {
        return Ok(key);
    }
    let content = Zeroizing::new(
        std::fs::read_to_string(arg).with_context(|| format!("reading key file: {arg}"))?,
    );
    content
        .lines()
        .find_map(decode_key)
        .with_context(|| format!("no base64 encoded key found in {arg}"))
}

fn non_empty(mut password: Zeroizing<String>) -> Result<SecretString> {
    if password.is_empty() {
        anyhow::bail!("empty password");
    }
    Ok(SecretString::from(std::mem::take(&mut *password)))
}

fn read_password(confirm: bool) -> Result<SecretString> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return non_empty(Zeroizing::new(password));
    }
    let password =
        Zeroizing::new(rpassword::prompt_password("Enter password: ").context("reading password")?);
    if confirm && !password.is_empty() {
        let again = Zeroizing::new(
            rpassword::prompt_password("Repeat password: ").context("reading password")?,
        );
        if *again != *password {
            anyhow::bail!("passwords do not match");
        }
    }
    non_empty(password)
}

fn exactly_one(given: usize) -> Result<()> {
    match given {
        1 => Ok(()),
        0 => anyhow::bail!("no key given: use one of the key options or --password"),
        _ => anyhow::bail!("only one kind of key may be given"),
    }
}

fn sealing_key(peer: Option<&str>, key_file: Option<&str>, password: bool) -> Result<SealingKey> {
    exactly_one(peer.is_some() as usize + key_file.is_some() as usize + password as usize)?;
    if let Some(peer) = peer {
        return Ok(SealingKey::Recipient(PublicKey::from(read_key(peer)?)));
    }
    if let Some(key_file) = key_file {
        return Ok(SealingKey::Symmetric(Kek::from_bytes(read_key(key_file)?)));
    }
    Ok(SealingKey::Password(read_password(true)?))
}

fn opening_key(private: Option<&str>, key_file: Option<&str>, password: bool) -> Result<OpeningKey> {
    exactly_one(private.is_some() as usize + key_file.is_some() as usize + password as usize)?;
    if let Some(private) = private {
        return Ok(OpeningKey::Private(StaticSecret::from(read_key(private)?)));
    }
    if let Some(key_file) = key_file {
        return Ok(OpeningKey::Symmetric(Kek::from_bytes(read_key(key_file)?)));
    }
    Ok(OpeningKey::Password(read_password(false)?))
}

// ── I/O helpers ───────────────────────────────────────────────────────────────

/// Parse a byte size with an optional k/M/G suffix (powers of 1024).
fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let (digits, shift) = match s.char_indices().last() {
        Some((i, 'k' | 'K')) => (&s[..i], 10),
        Some((i, 'm' | 'M')) => (&s[..i], 20),
        Some((i, 'g' | 'G')) => (&s[..i], 30),
        _ => (s, 0),
    };
    let n: usize = digits
        .parse()
        .map_err(|e| format!("invalid size {s:?}: {e}"))?;
    n.checked_shl(shift)
        .filter(|v| v >> shift == n)
        .ok_or_else(|| format!("size {s:?} is too large"))
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn Read>> {
    Ok(match path {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening input: {}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    })
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating output: {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

/// Create a file that must not exist yet.
fn write_new_file(path: &Path, content: &str, mode: u32) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options
        .open(path)
        .with_context(|| format!("creating {} (existing files are not overwritten)", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("writing {}", path.display()))
}

// ── `aenker encrypt` / `aenker decrypt` ───────────────────────────────────────

fn build_aenker(config: &AenkerConfig, chunk_size: Option<usize>) -> Result<Aenker> {
    let mut config = config.clone();
    if let Some(chunk_size) = chunk_size {
        config.stream.chunk_size = chunk_size;
    }
    Aenker::from_config(&config).context("invalid stream settings")
}

fn cmd_encrypt(config: &AenkerConfig, key: &SealingKey, io: &IoArgs) -> Result<()> {
    let aenker = build_aenker(config, io.chunk_size)?;
    let source = open_input(io.input.as_deref())?;
    let mut sink = open_output(io.output.as_deref())?;

    let summary = aenker
        .encrypt(key, source, &mut sink)
        .context("encryption failed")?;
    sink.flush().context("flushing output")?;

    info!(
        chunks = summary.chunks,
        bytes = summary.plaintext_bytes,
        "encrypted"
    );
    Ok(())
}

fn cmd_decrypt(config: &AenkerConfig, key: &OpeningKey, io: &IoArgs) -> Result<()> {
    let aenker = build_aenker(config, io.chunk_size)?;
    let source = open_input(io.input.as_deref())?;
    let mut sink = open_output(io.output.as_deref())?;

    let result = aenker
        .decrypt(key, source, &mut sink)
        .and_then(|summary| sink.flush().map(|()| summary).map_err(Into::into));
    drop(sink);

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            // whatever was written is untrusted
            if let Some(path) = &io.output {
                if let Err(rm) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), "could not remove partial output: {rm}");
                }
            }
            return Err(e).context("decryption failed");
        }
    };

    if summary.extra_data {
        eprintln!("aenker: warning: extraneous data after ciphertext was ignored");
    }
    info!(
        chunks = summary.chunks,
        bytes = summary.plaintext_bytes,
        "decrypted"
    );
    Ok(())
}

// ── `aenker keygen` / `pubkey` / `pbkdf` ──────────────────────────────────────

fn emit_key_pair(
    private: &StaticSecret,
    output: Option<&Path>,
    pubkey: Option<&Path>,
    comment: &str,
) -> Result<()> {
    let encoded = Zeroizing::new(BASE64.encode(private.as_bytes()));
    match output {
        Some(path) => write_new_file(path, &format!("# {comment}\n{}\n", *encoded), 0o600)?,
        None => {
            eprint!("private key:\n  ");
            println!("{}", *encoded);
        }
    }

    let public = BASE64.encode(public_key(private).as_bytes());
    match pubkey {
        Some(path) => write_new_file(path, &format!("{public}\n"), 0o644)?,
        None => {
            eprint!("public key:\n  ");
            println!("{public}");
        }
    }
    Ok(())
}

fn cmd_pubkey(private_key: &str) -> Result<()> {
    let private = StaticSecret::from(read_key(private_key)?);
    println!("{}", BASE64.encode(public_key(&private).as_bytes()));
    Ok(())
}

fn cmd_pbkdf(salt: &str, output: Option<&Path>, pubkey: Option<&Path>) -> Result<()> {
    let password = read_password(false)?;
    let private = derive_private_key(&password, salt).context("deriving key from password")?;
    emit_key_pair(&private, output, pubkey, &format!("aenker pbkdf, salt: {salt}"))?;

    eprintln!(
        "Encrypt for this key with:\n  aenker seal -p {}",
        BASE64.encode(public_key(&private).as_bytes())
    );
    Ok(())
}

// ── `aenker seal-mek` / `open-mek` ────────────────────────────────────────────

fn cmd_seal_mek(key_file: &str, output: Option<&Path>) -> Result<()> {
    let kek = Kek::from_bytes(read_key(key_file)?);
    let (mek, blob) = seal_new_mek(&kek).context("sealing media key")?;

    let mut sink = open_output(output)?;
    sink.write_all(blob.as_bytes()).context("writing media key blob")?;
    sink.flush().context("flushing output")?;

    let encoded = Zeroizing::new(BASE64.encode(mek.as_bytes()));
    eprintln!("media key: {}", *encoded);
    Ok(())
}

/// Open a blob and return the media key, base64 encoded.
fn cmd_open_mek(key_file: &str, input: Option<&Path>) -> Result<Zeroizing<String>> {
    let kek = Kek::from_bytes(read_key(key_file)?);
    let mut blob = Vec::new();
    open_input(input)?
        .read_to_end(&mut blob)
        .context("reading media key blob")?;

    let mek = open_mek(&kek, &blob).context("opening media key")?;
    Ok(Zeroizing::new(BASE64.encode(mek.as_bytes())))
}

// ── `aenker config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &AenkerConfig, config_path: Option<&Path>, found: bool) -> Result<()> {
    match config_path {
        Some(path) if found => println!("# Configuration from: {}", path.display()),
        Some(path) => println!("# Configuration: defaults (no file at {})", path.display()),
        None => println!("# Configuration: defaults"),
    }
    println!();
    let rendered = config.to_toml().context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
