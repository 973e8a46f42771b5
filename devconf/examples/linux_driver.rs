//! Sample driver for Linux hosts.
//!
//! Translates passwords to `chpasswd`, services to `service` plus an
//! upstart override, and service options to `KEY=value` lines in
//! `/etc/default/<service>`. Commands are executed one by one over the
//! device's configured transport (normally SSH).
//!
//! # Usage
//!
//! ```bash
//! cargo run --example linux_driver -- -c /etc/devconf/engine.toml -l debug
//! ```
//!
//! The engine must already be running on the same socket directory.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use async_trait::async_trait;
use log::{debug, error, info};

use devconf::device::DeviceId;
use devconf::driver::engine::{PASSWORD_META_KEY, USERNAME_META_KEY};
use devconf::rpc::{BoolReply, CommandSeq, Service, ServiceConfig, UserPass, Var};
use devconf::{DriverContext, DriverRuntime, DriverService, EngineConfig};

/// Room left after each command for the device's reply.
const OUTPUT_ROOM: usize = 30;

struct LinuxDriver;

#[async_trait]
impl DriverService for LinuxDriver {
    fn name(&self) -> &str {
        "linux"
    }

    async fn translate_pass(&self, _: &DriverContext, req: UserPass) -> devconf::Result<CommandSeq> {
        debug!("TranslatePass {}", req.username);
        Ok(CommandSeq::with_commands(req.device_id, [chpasswd(&req)]))
    }

    async fn translate_service(&self, _: &DriverContext, req: Service) -> devconf::Result<CommandSeq> {
        debug!("TranslateService {} {}", req.name, req.state);
        let cmd = if req.state {
            format!("rm -f /etc/init/{0}.override;service {0} start", req.name)
        } else {
            format!("service {0} stop; echo \"manual\" > /etc/init/{0}.override", req.name)
        };
        Ok(CommandSeq::with_commands(req.device_id, [cmd]))
    }

    async fn translate_var(&self, _: &DriverContext, req: Var) -> devconf::Result<CommandSeq> {
        debug!("TranslateVar {} ignored", req.key);
        Ok(CommandSeq::new(req.device_id))
    }

    async fn translate_svc_config(
        &self,
        _: &DriverContext,
        req: ServiceConfig,
    ) -> devconf::Result<CommandSeq> {
        Ok(CommandSeq::with_commands(
            req.device_id,
            [
                format!("sed -i -e 's/^{}[ ]*=.*//g' /etc/default/{}", req.key, req.name),
                format!("echo {}={} >> /etc/default/{}", req.key, req.value, req.name),
            ],
        ))
    }

    async fn execute_config(
        &self,
        ctx: &DriverContext,
        commands: CommandSeq,
    ) -> devconf::Result<BoolReply> {
        let id = commands.device_id;
        let mut transport = ctx.connect(id).await?;

        for cmd in commands.iter() {
            // The new root password has to be on record before the device
            // starts using it.
            save_root_password(ctx, id, cmd.as_str()).await?;

            debug!("Running {cmd}");
            let mut buf = cmd.as_str().as_bytes().to_vec();
            buf.resize(buf.len() + OUTPUT_ROOM, 0);
            if let Err(e) = transport.read(&mut buf).await {
                if !String::from_utf8_lossy(&buf).contains("Job is already running") {
                    info!("Command <<{cmd}>> failed: {e}");
                }
            }
        }

        transport.close().await?;
        Ok(true.into())
    }
}

/// Single-quote `s` for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn chpasswd(req: &UserPass) -> String {
    format!(
        "echo {}|chpasswd",
        shell_quote(&format!("{}:{}", req.username, req.password))
    )
}

/// `user` and `password` from `echo 'user:password'|chpasswd`.
fn password_change(cmd: &str) -> Option<(String, String)> {
    let quoted = cmd.strip_suffix("|chpasswd")?.strip_prefix("echo ")?;
    let text = quoted
        .strip_prefix('\'')?
        .strip_suffix('\'')?
        .replace(r"'\''", "'");
    let (user, password) = text.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

async fn save_root_password(ctx: &DriverContext, id: DeviceId, cmd: &str) -> devconf::Result<()> {
    let Some((user, password)) = password_change(cmd) else {
        return Ok(());
    };
    let login = ctx.engine().get_meta(id, USERNAME_META_KEY).await?;
    if user == login {
        debug!("Recording new password for {login}");
        ctx.engine().save_meta(id, PASSWORD_META_KEY, &password).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("linux_driver: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };
    match config.log_level(args.log_level.as_deref()) {
        Ok(level) => devconf::config::init_logging(level),
        Err(e) => {
            eprintln!("linux_driver: {e}");
            return ExitCode::FAILURE;
        }
    }

    match DriverRuntime::from_config(LinuxDriver, &config.translation).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Simple argument parser
struct Args {
    config: Option<PathBuf>,
    log_level: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut config = None;
        let mut log_level = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" | "-c" => {
                    i += 1;
                    if i < args.len() {
                        config = Some(PathBuf::from(&args[i]));
                    }
                }
                "--log-level" | "-l" => {
                    i += 1;
                    if i < args.len() {
                        log_level = Some(args[i].clone());
                    }
                }
                "--help" | "-h" => {
                    println!("USAGE:\n    linux_driver [-c <config>] [-l <level>]");
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                }
            }
            i += 1;
        }

        Self { config, log_level }
    }
}
