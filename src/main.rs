use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use acmeroot::{
    account,
    config::{directories, ClientConfig},
    flow::{self, CertRequest, DomainMap},
    identity::Identity,
    key_pair::KeyPair,
    output::OutputTargets,
    session::Session,
};
use anyhow::{bail, Context, Result};
use clap::{ArgAction, ArgMatches, Args, CommandFactory, FromArgMatches, Parser, Subcommand};
use tracing::debug;

/// Let's Encrypt ACME v01 command line client (HTTP-01 via webroot).
///
/// All keys are in PEM format.
#[derive(Parser, Debug)]
#[command(name = "acmeroot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// ACME directory URL
    #[arg(long, global = true, env = "ACMEROOT_DIRECTORY", default_value = directories::LETS_ENCRYPT_PRODUCTION)]
    directory: String,

    /// Log filter used when RUST_LOG is not set (e.g. info, debug, acmeroot=trace)
    #[arg(long, global = true, env = "ACMEROOT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a new RSA key and print it to stdout
    Genrsa {
        /// RSA key size in bits
        #[arg(default_value_t = KeyPair::DEFAULT_BITS)]
        bits: u32,
    },
    /// Register an account key with the ACME server
    Register(RegisterArgs),
    /// Same as register but accepts the terms of service automatically
    AutoRegister(RegisterArgs),
    /// Issue a certificate
    Cert(CertArgs),
    /// Revoke a certificate
    Revoke {
        /// Account key or domain key
        key: PathBuf,
        /// Certificate or fullchain
        cert: PathBuf,
    },
    /// Deactivate an account
    Deactivate {
        account_key: PathBuf,
        /// Account URL, shown by the register subcommand
        account_id: String,
    },
}

#[derive(Args, Debug)]
struct RegisterArgs {
    account_key: PathBuf,
    /// Contact e-mail
    email: Option<String>,
}

#[derive(Args, Debug)]
struct CertArgs {
    account_key: PathBuf,
    /// Private key whose public part goes into the CSR
    domain_key: PathBuf,

    /// Path to the webroot; applies to every -d that follows it
    #[arg(short = 'w', long = "webroot", value_name = "PATH", action = ArgAction::Append)]
    webroot: Vec<PathBuf>,

    /// Domain name, can be repeated
    #[arg(short = 'd', long = "domain", value_name = "DOMAIN", required = true, action = ArgAction::Append)]
    domain: Vec<String>,

    /// Output certificate
    #[arg(long, value_name = "FILE")]
    cert: Option<PathBuf>,

    /// Output intermediate CA certificate
    #[arg(long, value_name = "FILE")]
    chain: Option<PathBuf>,

    /// Output cert + chain
    #[arg(long, value_name = "FILE")]
    fullchain: Option<PathBuf>,

    /// Output CSR
    #[arg(long, value_name = "FILE")]
    csr: Option<PathBuf>,

    /// Do not verify the webroots over HTTP before requesting authorizations
    #[arg(long)]
    skip_self_check: bool,
}

fn main() -> ExitCode {
    let matches = Cli::command().get_matches();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    match run(cli, &matches) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, matches: &ArgMatches) -> Result<()> {
    let config = ClientConfig::new(&cli.directory);
    debug!(directory = %config.directory_url, "using ACME directory");

    match cli.command {
        Commands::Genrsa { bits } => {
            let pem = KeyPair::generate(Some(bits))
                .and_then(|key_pair| key_pair.to_pem())
                .context("Failed to generate RSA key")?;
            io::stdout().write_all(&pem)?;
        }
        Commands::Register(args) => register(config, args, prompt_agreement)?,
        Commands::AutoRegister(args) => register(config, args, |_| true)?,
        Commands::Cert(args) => {
            let cert_matches = matches
                .subcommand_matches("cert")
                .context("missing cert arguments")?;
            let domains = domain_map(cert_matches)?;
            cert(config.self_check(!args.skip_self_check), args, domains)?;
        }
        Commands::Revoke { key, cert } => {
            let mut session = open_session(config, &key)?;
            flow::revoke(&mut session, &cert)?;
            println!("Certificate revoked !");
        }
        Commands::Deactivate {
            account_key,
            account_id,
        } => {
            let mut session = open_session(config, &account_key)?;
            account::deactivate(&mut session, &account_id)?;
            println!("Account deactivated: {}", account_id);
        }
    }
    Ok(())
}

fn open_session(config: ClientConfig, key: &Path) -> Result<Session> {
    let identity = Identity::load(key)
        .with_context(|| format!("Failed to load key: {}", key.display()))?;
    Ok(Session::connect(config, identity)?)
}

fn register<F>(config: ClientConfig, args: RegisterArgs, agree: F) -> Result<()>
where
    F: FnOnce(&str) -> bool,
{
    let mut session = open_session(config, &args.account_key)?;
    let registration = account::register(&mut session, args.email.as_deref(), agree)?;

    if registration.created {
        println!("Account created !");
    }
    println!(
        "Account ID: {}",
        registration.id.as_deref().unwrap_or("unknown")
    );
    println!("Account URL: {}", registration.location);
    if let Some(created_at) = &registration.created_at {
        println!("Created at: {}", created_at);
    }
    if registration.contact.is_empty() {
        println!("Contact: NOT SET !");
    } else {
        println!("Contact: {}", registration.contact.join(", "));
    }
    match (&registration.agreement, &registration.terms_of_service) {
        (Some(agreement), _) => println!("Agreement: {}", agreement),
        (None, Some(tos)) => println!("Terms of Service NOT accepted: {}", tos),
        (None, None) => {}
    }
    Ok(())
}

fn prompt_agreement(tos: &str) -> bool {
    println!("Terms of Service:\n\t{}", tos);
    print!("Agree? [y/N] ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => answer.trim().eq_ignore_ascii_case("y"),
        Err(_) => false,
    }
}

fn cert(config: ClientConfig, args: CertArgs, domains: DomainMap) -> Result<()> {
    let domain_key = KeyPair::from_file(&args.domain_key)
        .with_context(|| format!("Failed to load domain key: {}", args.domain_key.display()))?;
    let request = CertRequest {
        domain_key,
        domains,
        outputs: OutputTargets {
            cert: args.cert,
            chain: args.chain,
            fullchain: args.fullchain,
            csr: args.csr,
        },
    };

    let mut session = open_session(config, &args.account_key)?;
    let issued = flow::issue(&mut session, &request)?;

    for path in &issued.saved {
        println!("Saved {}", path.display());
    }
    println!("Certificate valid until {}", issued.expires_at.to_rfc3339());
    Ok(())
}

/// 依命令列順序配對 `-w` 與 `-d`：每個網域使用在它之前最近出現的 web root。
fn domain_map(matches: &ArgMatches) -> Result<DomainMap> {
    let webroots = indexed::<PathBuf>(matches, "webroot");
    let domains = indexed::<String>(matches, "domain");

    let mut map = DomainMap::new();
    for (index, domain) in domains {
        let Some((_, webroot)) = webroots.iter().rev().find(|(w, _)| *w < index) else {
            bail!("-w, --webroot must be specified in front of -d, --domain ({})", domain);
        };
        map.insert(domain, webroot.as_path())?;
    }
    Ok(map)
}

fn indexed<'a, T>(matches: &'a ArgMatches, id: &str) -> Vec<(usize, &'a T)>
where
    T: Clone + Send + Sync + 'static,
{
    match (matches.indices_of(id), matches.get_many::<T>(id)) {
        (Some(indices), Some(values)) => indices.zip(values).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert_matches(args: &[&str]) -> ArgMatches {
        let mut argv = vec!["acmeroot", "cert", "account.pem", "domain.pem"];
        argv.extend_from_slice(args);
        Cli::command()
            .try_get_matches_from(argv)
            .unwrap()
            .subcommand_matches("cert")
            .unwrap()
            .clone()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_webroot_applies_to_following_domains() {
        let matches = cert_matches(&[
            "-w", "/var/www/a", "-d", "a.example", "-d", "www.a.example",
            "-w", "/var/www/b", "-d", "b.example", "--fullchain", "full.pem",
        ]);
        let map = domain_map(&matches).unwrap();
        let pairs: Vec<(String, PathBuf)> = map
            .iter()
            .map(|(d, w)| (d.to_string(), w.to_path_buf()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("a.example".to_string(), PathBuf::from("/var/www/a")),
                ("www.a.example".to_string(), PathBuf::from("/var/www/a")),
                ("b.example".to_string(), PathBuf::from("/var/www/b")),
            ]
        );
    }

    #[test]
    fn test_domain_before_webroot_is_rejected() {
        let matches = cert_matches(&["-d", "a.example", "-w", "/var/www"]);
        assert!(domain_map(&matches).is_err());
    }

    #[test]
    fn test_duplicate_domain_is_rejected() {
        let matches = cert_matches(&["-w", "/var/www", "-d", "a.example", "-d", "a.example"]);
        assert!(domain_map(&matches).is_err());
    }
}
