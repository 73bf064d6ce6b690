use tokio::sync::watch;

/// Sending half of the shutdown signal, shared by every task of a pipeline.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Receiving half of the shutdown signal.
///
/// A task observes the shutdown through [`watch::Receiver::changed`], which also resolves once
/// every [`ShutdownTx`] is dropped.
pub type ShutdownRx = watch::Receiver<()>;

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}
