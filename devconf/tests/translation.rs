//! End-to-end tests: a real gateway and an in-process driver talking over
//! Unix sockets in a temporary directory.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use devconf::device::{DeviceId, DeviceRecord};
use devconf::driver::EngineClient;
use devconf::error::{Error, GatewayError, RpcError, RpcFault, TranslateError};
use devconf::gateway::Gateway;
use devconf::rpc::{BoolReply, CommandSeq, Service, ServiceConfig, UserPass, Var};
use devconf::store::{MemoryInventory, MemoryStore, MetadataStore, RAW_CONFIG_FILE};
use devconf::{Coordinator, DriverContext, DriverRuntime, DriverService};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Driver that renders operations as readable commands. A service named
/// `broken` fails to translate; a command containing `reject` makes
/// execution fail.
struct Stub {
    executed: Arc<Mutex<Vec<CommandSeq>>>,
}

#[async_trait]
impl DriverService for Stub {
    fn name(&self) -> &str {
        "stub"
    }

    async fn translate_pass(&self, _: &DriverContext, req: UserPass) -> devconf::Result<CommandSeq> {
        Ok(CommandSeq::with_commands(
            req.device_id,
            [format!("passwd {} {}", req.username, req.password)],
        ))
    }

    async fn translate_service(&self, _: &DriverContext, req: Service) -> devconf::Result<CommandSeq> {
        if req.name == "broken" {
            return Err(TranslateError::UnknownServiceState("broken".into()).into());
        }
        let verb = if req.state { "start" } else { "stop" };
        Ok(CommandSeq::with_commands(
            req.device_id,
            [format!("{verb} {}", req.name)],
        ))
    }

    async fn translate_var(&self, ctx: &DriverContext, req: Var) -> devconf::Result<CommandSeq> {
        let site = ctx.engine().get_meta(req.device_id, "site").await?;
        Ok(CommandSeq::with_commands(
            req.device_id,
            [format!("set {}={} # {site}", req.key, req.value)],
        ))
    }

    async fn translate_svc_config(
        &self,
        _: &DriverContext,
        req: ServiceConfig,
    ) -> devconf::Result<CommandSeq> {
        Ok(CommandSeq::with_commands(
            req.device_id,
            [
                format!("unset {}.{}", req.name, req.key),
                format!("set {}.{}={}", req.name, req.key, req.value),
            ],
        ))
    }

    async fn execute_config(
        &self,
        _: &DriverContext,
        commands: CommandSeq,
    ) -> devconf::Result<BoolReply> {
        let ok = !commands.iter().any(|c| c.as_str().contains("reject"));
        self.executed.lock().unwrap().push(commands);
        Ok(ok.into())
    }
}

struct Harness {
    dir: tempfile::TempDir,
    gateway: Gateway,
    store: Arc<MemoryStore>,
    coordinator: Coordinator,
    executed: Arc<Mutex<Vec<CommandSeq>>>,
    driver: Option<(CancellationToken, JoinHandle<devconf::Result<()>>)>,
}

impl Harness {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let inventory = Arc::new(MemoryInventory::new());
        inventory.insert(DeviceRecord::new(1, "rtu-1")).await;
        inventory.insert(DeviceRecord::new(2, "orphan")).await;
        let store = Arc::new(MemoryStore::new());
        store.save_meta("rtu-1", "driver", "stub").await.unwrap();
        store.save_meta("rtu-1", "site", "north").await.unwrap();
        store.save_meta("orphan", "driver", "ghost").await.unwrap();

        let gateway = Gateway::bind(dir.path(), TIMEOUT, inventory.clone(), store.clone())
            .await
            .unwrap();
        let coordinator = Coordinator::new(
            gateway.registry().clone(),
            inventory,
            store.clone(),
            store.clone(),
        );

        let mut harness = Self {
            dir,
            gateway,
            store,
            coordinator,
            executed: Arc::new(Mutex::new(Vec::new())),
            driver: None,
        };
        harness.start_driver().await;
        harness
    }

    fn socket_dir(&self) -> &Path {
        self.dir.path()
    }

    async fn start_driver(&mut self) {
        let token = CancellationToken::new();
        let runtime = DriverRuntime::new(Stub {
            executed: self.executed.clone(),
        })
        .socket_dir(self.socket_dir())
        .rpc_timeout(TIMEOUT);
        let task = tokio::spawn(runtime.run_until(token.clone()));
        self.driver = Some((token, task));

        wait_for(|| self.gateway.registry().get("stub").is_some_and(|r| r.is_alive())).await;
    }

    async fn stop_driver(&mut self) -> devconf::Result<()> {
        let (token, task) = self.driver.take().unwrap();
        token.cancel();
        let result = task.await.unwrap();
        wait_for(|| !self.gateway.registry().get("stub").is_some_and(|r| r.is_alive())).await;
        result
    }
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..250 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_configure_translates_in_order() {
    let h = Harness::start().await;
    let seq = h
        .coordinator
        .configure(
            DeviceId(1),
            "SERVICE telnet OFF\nPASSWORD root s3cret\nSET ntp 10.0.0.1\nSERVICE ssh port 2222",
        )
        .await
        .unwrap();

    assert_eq!(seq.device_id, DeviceId(1));
    let commands: Vec<&str> = seq.iter().map(|c| c.as_str()).collect();
    assert_eq!(
        commands,
        [
            "stop telnet",
            "passwd root s3cret",
            "set ntp=10.0.0.1 # north",
            "unset ssh.port",
            "set ssh.port=2222",
        ]
    );
}

#[tokio::test]
async fn test_failed_statements_are_skipped() {
    let h = Harness::start().await;
    let seq = h
        .coordinator
        .configure(
            DeviceId(1),
            "SERVICE broken ON SERVICE ftp Off SERVICE ssh ON SET mode remote",
        )
        .await
        .unwrap();

    let commands: Vec<&str> = seq.iter().map(|c| c.as_str()).collect();
    assert_eq!(commands, ["start ssh", "set mode=remote # north"]);

    let artifacts = h.store.artifacts().await;
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].device, "rtu-1");
    assert_eq!(
        artifacts[0].files[RAW_CONFIG_FILE],
        b"start ssh\nset mode=remote # north\n"
    );
}

#[tokio::test]
async fn test_compile_error_aborts_batch() {
    let h = Harness::start().await;
    let err = h
        .coordinator
        .configure(DeviceId(1), "SERVICE ssh ON PASSWORD root")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Compile(_)));
    assert!(h.store.artifacts().await.is_empty());
}

#[tokio::test]
async fn test_routing_errors() {
    let h = Harness::start().await;

    let err = h
        .coordinator
        .configure(DeviceId(2), "SERVICE ssh ON")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Gateway(GatewayError::NoDriver { ref name }) if name == "ghost"
    ));

    let err = h
        .coordinator
        .configure(DeviceId(99), "SERVICE ssh ON")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Gateway(GatewayError::UnknownDevice(DeviceId(99)))));
    assert!(h.store.artifacts().await.is_empty());
}

#[tokio::test]
async fn test_execute_config() {
    let h = Harness::start().await;
    let seq = h
        .coordinator
        .execute_config(DeviceId(1), "SERVICE ssh ON SET banner hello")
        .await
        .unwrap();
    assert_eq!(seq.len(), 2);

    let executed = h.executed.lock().unwrap().clone();
    assert_eq!(executed, [seq]);
}

#[tokio::test]
async fn test_execute_config_rejected() {
    let h = Harness::start().await;
    let err = h
        .coordinator
        .execute_config(DeviceId(1), "SERVICE reject ON")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Translate(TranslateError::Rejected { ref driver }) if driver == "stub"
    ));
    // Translation still ran and was recorded.
    assert_eq!(h.store.artifacts().await.len(), 1);
}

#[tokio::test]
async fn test_get_config_not_implemented() {
    let h = Harness::start().await;
    let err = h.coordinator.get_config(DeviceId(1)).await.unwrap_err();
    assert!(err.is_not_implemented(), "{err}");
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let h = Harness::start().await;
    let other = h.socket_dir().join("stub-2.sock");
    let _listener = UnixListener::bind(&other).unwrap();

    let engine = EngineClient::connect(h.socket_dir(), TIMEOUT).await.unwrap();
    let err = engine.register("stub", &other).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Rpc(RpcError::Remote(ref f)) if f.code == RpcFault::ALREADY_REGISTERED
    ));

    let reg = h.gateway.registry().get("stub").unwrap();
    assert_eq!(reg.socket, h.socket_dir().join("stub.sock"));
}

#[tokio::test]
async fn test_driver_restart_registers_again() {
    let mut h = Harness::start().await;
    h.stop_driver().await.unwrap();
    assert!(!h.socket_dir().join("stub.sock").exists());

    let err = h
        .coordinator
        .configure(DeviceId(1), "SERVICE ssh ON")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Gateway(GatewayError::StaleSocket { .. })));
    assert!(h.gateway.registry().is_empty());

    h.start_driver().await;
    let seq = h
        .coordinator
        .configure(DeviceId(1), "SERVICE ssh ON")
        .await
        .unwrap();
    assert_eq!(seq.len(), 1);
}

#[tokio::test]
async fn test_driver_exits_when_gateway_stops() {
    let mut h = Harness::start().await;
    let (_token, task) = h.driver.take().unwrap();
    let socket = h.socket_dir().join("stub.sock");

    let Harness { gateway, .. } = h;
    gateway.shutdown().await;

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Rpc(RpcError::Disconnected)));
    assert!(!socket.exists());
}
