use std::path::PathBuf;

use anyhow::Context;
use registry_security::{Config, Credential, SendOption};
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

/// CLI options for regsec
#[derive(StructOpt, Clone, Debug)]
#[structopt(
    name = "regsec",
    about = "Shows how requests to a container registry will be secured"
)]
struct Opts {
    #[structopt(
        short = "c",
        long = "config",
        env = "REGSEC_CONFIG",
        help = "The security config to load. Files ending in .json are read as JSON, anything else as YAML"
    )]
    config: PathBuf,

    #[structopt(
        short = "a",
        long = "addr",
        env = "REGSEC_ADDR",
        help = "The registry address, e.g. registry.example.com or localhost:5000"
    )]
    addr: String,

    #[structopt(
        short = "r",
        long = "repo",
        env = "REGSEC_REPO",
        default_value = "",
        help = "The repository requests will be made for"
    )]
    repo: String,

    #[structopt(
        long = "no-defaults",
        help = "Use the config as written instead of filling in TLS defaults"
    )]
    no_defaults: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::from_args();
    let config = Config::from_file(&opts.config)
        .with_context(|| format!("unable to load {}", opts.config.display()))?;
    let config = if opts.no_defaults {
        config
    } else {
        config.apply_defaults()
    };
    tracing::debug!(config = %opts.config.display(), defaults = !opts.no_defaults, "Loaded config");

    let option = config
        .send_option(&opts.addr, &opts.repo)
        .with_context(|| format!("unable to resolve send option for {}", opts.addr))?;
    // Make sure the result is usable before reporting on it
    option.client().context("unable to build http client")?;

    println!("{}", describe(&option));
    Ok(())
}

fn describe(option: &SendOption) -> String {
    match option {
        SendOption::Noop => "noop".to_owned(),
        SendOption::Tls(context) => format!(
            "tls (extra roots: {}, client certificate: {}, verify: {})",
            context.root_certificates().len(),
            context.has_client_identity(),
            !context.accepts_invalid_certificates()
        ),
        SendOption::BasicAuth(transport) => {
            let credential = match &transport.identity().credential {
                Credential::Anonymous => "none".to_owned(),
                Credential::Password { username, .. } => format!("password for {}", username),
                Credential::EncodedBasic(_) => "encoded basic auth".to_owned(),
                Credential::Token(_) => "identity token".to_owned(),
            };
            format!(
                "basic auth (registry: {}, scope: {}, credentials: {}, tls: {})",
                transport.addr(),
                transport.scope(),
                credential,
                transport.tls().is_some()
            )
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use registry_security::{BasicAuthTransport, Identity};

    #[test]
    fn describe_never_prints_secrets() {
        let option = SendOption::BasicAuth(BasicAuthTransport::new(
            "registry.example.com",
            "team/app",
            None,
            Identity {
                server_address: "registry.example.com".to_owned(),
                credential: Credential::Password {
                    username: "robot".to_owned(),
                    password: "hunter2".to_owned(),
                },
            },
        ));
        let description = describe(&option);
        assert_eq!(
            description,
            "basic auth (registry: registry.example.com, scope: repository:team/app:pull,push, credentials: password for robot, tls: false)"
        );
        assert!(!description.contains("hunter2"));
    }

    #[test]
    fn describe_noop() {
        assert_eq!(describe(&SendOption::Noop), "noop");
    }
}
