//! yamlcrypt CLI - Encrypt and decrypt tagged YAML values with age.
//!
//! Values tagged `!crypto/age` are sealed to age recipients by `encrypt`,
//! opened with age identities by `decrypt`, and moved to a new recipient set
//! by `rekey`. Every other node of the document is left as it was.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use yamlcrypt_crypto::{Identities, Recipients};
use yamlcrypt_yaml::{Node, Resolver, Transformer, SENTINEL_TAG};

#[derive(Parser)]
#[command(name = "yamlcrypt")]
#[command(about = "yamlcrypt - Encrypt and decrypt tagged YAML values with age")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Tag marking the values to encrypt or decrypt.
    #[arg(long, global = true, default_value = SENTINEL_TAG)]
    tag: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decrypt every tagged value of a document.
    Decrypt {
        #[command(flatten)]
        keys: IdentityArgs,

        #[command(flatten)]
        io: IoArgs,
    },

    /// Encrypt every tagged value of a document.
    Encrypt {
        #[command(flatten)]
        keys: RecipientArgs,

        #[command(flatten)]
        io: IoArgs,
    },

    /// Decrypt tagged values, then encrypt them to a new recipient set.
    Rekey {
        #[command(flatten)]
        identities: IdentityArgs,

        #[command(flatten)]
        recipients: RecipientArgs,

        #[command(flatten)]
        io: IoArgs,
    },
}

#[derive(Args)]
struct IdentityArgs {
    /// age identity file (repeatable).
    #[arg(short, long)]
    identity: Vec<PathBuf>,

    /// Prompt for a passphrase to decrypt with.
    #[arg(short, long)]
    passphrase: bool,
}

#[derive(Args)]
struct RecipientArgs {
    /// age recipient, `age1...` (repeatable).
    #[arg(short, long)]
    recipient: Vec<String>,

    /// File with one recipient per line (repeatable).
    #[arg(short = 'R', long)]
    recipients_file: Vec<PathBuf>,

    /// Prompt for a passphrase to encrypt to.
    #[arg(long)]
    to_passphrase: bool,
}

#[derive(Args)]
struct IoArgs {
    /// Input YAML file (default: stdin).
    input: Option<PathBuf>,

    /// Output file (default: stdout).
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Decrypt { keys, io } => cmd_decrypt(&keys, &io, &cli.tag),

        Commands::Encrypt { keys, io } => cmd_encrypt(&keys, &io, &cli.tag),

        Commands::Rekey {
            identities,
            recipients,
            io,
        } => cmd_rekey(&identities, &recipients, &io, &cli.tag),
    }
}

/// Prompt for passphrase securely.
fn prompt_passphrase(prompt: &str) -> Result<String> {
    let passphrase = rpassword::prompt_password(prompt).context("Failed to read passphrase")?;
    if passphrase.is_empty() {
        anyhow::bail!("Passphrase cannot be empty");
    }
    Ok(passphrase)
}

/// Collect identities from files and an optional passphrase.
fn load_identities(args: &IdentityArgs) -> Result<Identities> {
    let mut identities = Identities::new();
    for path in &args.identity {
        let loaded = Identities::from_file(path)
            .with_context(|| format!("Failed to load identities from {}", path.display()))?;
        identities.extend(loaded);
    }

    if args.passphrase {
        identities = identities.with_passphrase(prompt_passphrase("Passphrase: ")?);
    }

    if identities.is_empty() {
        anyhow::bail!("No identities given. Use --identity or --passphrase");
    }
    Ok(identities)
}

/// Collect recipients from arguments, files and an optional passphrase.
fn load_recipients(args: &RecipientArgs) -> Result<Recipients> {
    let mut recipients = Recipients::new();
    for recipient in &args.recipient {
        recipients.push(Recipients::parse_recipient(recipient).context("Invalid recipient")?);
    }

    for path in &args.recipients_file {
        let loaded = Recipients::from_file(path)
            .with_context(|| format!("Failed to load recipients from {}", path.display()))?;
        recipients.extend(loaded);
    }

    if args.to_passphrase {
        if !recipients.is_empty() {
            anyhow::bail!("--to-passphrase cannot be combined with other recipients");
        }
        let passphrase = prompt_passphrase("Encryption passphrase: ")?;
        let confirm = prompt_passphrase("Confirm encryption passphrase: ")?;
        if passphrase != confirm {
            anyhow::bail!("Passphrases do not match");
        }
        recipients = recipients.with_passphrase(passphrase);
    }

    if recipients.is_empty() {
        anyhow::bail!("No recipients given. Use --recipient, --recipients-file or --to-passphrase");
    }
    Ok(recipients)
}

/// Decrypt tagged values.
fn cmd_decrypt(keys: &IdentityArgs, io: &IoArgs, tag: &str) -> Result<()> {
    let identities = load_identities(keys)?;
    let resolver = Resolver::new(&identities)
        .with_tag(tag)
        .context("Invalid tag")?;

    let documents = read_documents(io.input.as_deref())?;
    let documents = documents
        .into_iter()
        .map(|doc| resolver.resolve(doc).context("Failed to decrypt document"))
        .collect::<Result<Vec<_>>>()?;

    info!("Decrypted {} documents", documents.len());
    write_documents(io.output.as_deref(), &documents)
}

/// Encrypt tagged values.
fn cmd_encrypt(keys: &RecipientArgs, io: &IoArgs, tag: &str) -> Result<()> {
    let recipients = load_recipients(keys)?;
    let transformer = Transformer::new(recipients)
        .with_tag(tag)
        .context("Invalid tag")?;

    let documents = read_documents(io.input.as_deref())?;
    let documents = documents
        .into_iter()
        .map(|doc| transformer.encrypt(doc).context("Failed to encrypt document"))
        .collect::<Result<Vec<_>>>()?;

    info!("Encrypted {} documents", documents.len());
    write_documents(io.output.as_deref(), &documents)
}

/// Move tagged values to a new recipient set.
fn cmd_rekey(
    identity_args: &IdentityArgs,
    recipient_args: &RecipientArgs,
    io: &IoArgs,
    tag: &str,
) -> Result<()> {
    let identities = load_identities(identity_args)?;
    let recipients = load_recipients(recipient_args)?;

    let resolver = Resolver::new(&identities)
        .with_tag(tag)
        .context("Invalid tag")?;
    let transformer = Transformer::new(recipients)
        .with_tag(tag)
        .context("Invalid tag")?;

    let documents = read_documents(io.input.as_deref())?;
    let documents = rekey_documents(&resolver, &transformer, documents)?;

    info!("Rekeyed {} documents", documents.len());
    write_documents(io.output.as_deref(), &documents)
}

fn rekey_documents(
    resolver: &Resolver<'_>,
    transformer: &Transformer,
    documents: Vec<Node>,
) -> Result<Vec<Node>> {
    documents
        .into_iter()
        .map(|doc| {
            let plain = resolver.resolve(doc).context("Failed to decrypt document")?;
            transformer
                .encrypt(plain)
                .context("Failed to encrypt document")
        })
        .collect()
}

/// Read every document from a file, or stdin when no path is given.
fn read_documents(input: Option<&Path>) -> Result<Vec<Node>> {
    let yaml = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut yaml = String::new();
            std::io::stdin()
                .read_to_string(&mut yaml)
                .context("Failed to read stdin")?;
            yaml
        }
    };

    let documents = Node::parse_all(&yaml).context("Failed to parse YAML")?;
    debug!("Read {} documents", documents.len());
    Ok(documents)
}

/// Render documents as one YAML stream.
fn render_documents(documents: &[Node]) -> Result<String> {
    let mut out = String::new();
    for (i, doc) in documents.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        out.push_str(&doc.to_yaml().context("Failed to serialize YAML")?);
    }
    Ok(out)
}

/// Write documents to a file, or stdout when no path is given.
fn write_documents(output: Option<&Path>, documents: &[Node]) -> Result<()> {
    let yaml = render_documents(documents)?;
    match output {
        Some(path) => std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(yaml.as_bytes())
                .context("Failed to write stdout")?;
            stdout.flush()?;
        }
    }
    Ok(())
}
