//! Controller behavior against an in-memory launcher

mod common;

use async_trait::async_trait;
use futures::TryStreamExt;
use futures::future;
use process_streams::{
    Controller, Error, ExitStatus, KillSwitch, LaunchArgs, Launcher, ProcessHandle,
    ProcessState, RawReader, RawWriter, Result,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{init_tracing, recorded_states};

/// How the fake process reports its exit
#[derive(Clone)]
enum Exit {
    Code(i32),
    Fail,
    /// Wait until a code arrives on the channel
    Deferred(async_channel::Receiver<i32>),
}

#[derive(Clone)]
struct FakeLauncher {
    output: &'static [u8],
    exit: Exit,
    kills: Arc<AtomicUsize>,
}

impl FakeLauncher {
    fn new(output: &'static [u8], exit: Exit) -> Self {
        Self {
            output,
            exit,
            kills: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct FakeProcess {
    stdin: Option<RawWriter>,
    stdout: Option<RawReader>,
    exit: Exit,
    kills: Arc<AtomicUsize>,
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, _args: &LaunchArgs) -> Result<Box<dyn ProcessHandle>> {
        Ok(Box::new(FakeProcess {
            stdin: Some(Box::pin(futures::io::sink())),
            stdout: Some(Box::pin(futures::io::Cursor::new(self.output))),
            exit: self.exit.clone(),
            kills: self.kills.clone(),
        }))
    }
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn take_stdin(&mut self) -> Option<RawWriter> {
        self.stdin.take()
    }

    fn take_stdout(&mut self) -> Option<RawReader> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<RawReader> {
        None
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        match &self.exit {
            Exit::Code(code) => Ok(ExitStatus::from_code(*code)),
            Exit::Fail => Err(Error::exit_wait_failed("fake wait failure")),
            Exit::Deferred(codes) => codes
                .recv()
                .await
                .map(ExitStatus::from_code)
                .map_err(|_| Error::exit_wait_failed("exit code channel closed")),
        }
    }

    fn kill_switch(&self) -> KillSwitch {
        let kills = self.kills.clone();
        KillSwitch::new(move || {
            kills.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

fn args() -> LaunchArgs {
    LaunchArgs::new(["fake"]).unwrap()
}

#[smol_potat::test]
async fn test_custom_launcher_streams_and_exit() {
    init_tracing();

    let controller = Controller::new(FakeLauncher::new(b"fake output", Exit::Code(5)));
    let output = controller.spawn(args()).output().await.unwrap();

    assert_eq!(output.stdout, b"fake output");
    assert!(output.stderr.is_empty());
    assert_eq!(output.state, ProcessState::Exited(5));
}

#[smol_potat::test]
async fn test_wait_failure_is_reported() {
    init_tracing();

    let controller = Controller::new(FakeLauncher::new(b"", Exit::Fail));
    let subprocess = controller.spawn(args());
    let state = subprocess.state();
    let destroyer = subprocess.destroyer();

    let result = subprocess.run(|_handle| async { Ok(()) }).await;

    assert!(matches!(result, Err(Error::ExitWait { .. })));
    // No exit was observed, so no terminal state is claimed.
    assert_eq!(state.get(), ProcessState::Running);
    assert_eq!(state.wait_terminal().await, None);
    assert!(destroyer.is_closed());
}

#[smol_potat::test]
async fn test_destroy_fires_kill_switch_once() {
    let launcher = FakeLauncher::new(b"", Exit::Code(0));
    let kills = launcher.kills.clone();
    let subprocess = Controller::new(launcher).spawn(args());
    let state = subprocess.state();
    let destroyer = subprocess.destroyer();

    subprocess
        .run(|_handle| async move {
            assert!(destroyer.destroy().await?);
            assert!(!destroyer.destroy().await?);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(kills.load(Ordering::SeqCst), 1);
    // The later exit does not overwrite the destroyed state.
    assert_eq!(
        recorded_states(&state),
        vec![
            ProcessState::NotRunning,
            ProcessState::Running,
            ProcessState::Destroyed
        ]
    );
}

#[smol_potat::test]
async fn test_dropped_run_is_reaped_in_background() {
    init_tracing();

    let (exit_tx, exit_rx) = async_channel::bounded(1);
    let subprocess =
        Controller::new(FakeLauncher::new(b"", Exit::Deferred(exit_rx))).spawn(args());
    let state = subprocess.state();
    let destroyer = subprocess.destroyer();

    let mut run = Box::pin(subprocess.run(|_handle| future::pending::<Result<()>>()));
    assert!(futures::poll!(&mut run).is_pending());
    assert_eq!(state.get(), ProcessState::Running);

    drop(run);
    exit_tx.send(9).await.unwrap();

    assert_eq!(state.wait_terminal().await, Some(ProcessState::Exited(9)));
    assert!(destroyer.is_closed());
}

#[smol_potat::test]
async fn test_input_reaches_fake_stdin() {
    use futures::SinkExt;

    let subprocess = Controller::new(FakeLauncher::new(b"", Exit::Code(0))).spawn(args());

    subprocess
        .run(|mut handle| async move {
            handle.stdin().send(b"discarded".to_vec()).await?;
            let rest: Vec<Vec<u8>> = handle.stdout().try_collect().await?;
            assert!(rest.is_empty());
            Ok(())
        })
        .await
        .unwrap();
}
