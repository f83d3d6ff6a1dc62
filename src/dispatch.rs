//! Output dispatcher: hands decoded pictures to the pixel consumer on its own thread.
//!
//! Consumers may be slow (format conversion, uploads, encoding). Running them on
//! the decode loop would stall input draining, so pictures are moved through a
//! channel to a dedicated `output-dispatch` thread instead. The consumer can be
//! replaced at any time; pictures arriving while none is registered are dropped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::types::DecodedPicture;
use crate::{DecodeError, Result};

/// Receives decoded raw pictures
pub trait PixelConsumer: Send + 'static {
    fn on_picture(&mut self, picture: DecodedPicture);
}

impl<F> PixelConsumer for F
where
    F: FnMut(DecodedPicture) + Send + 'static,
{
    fn on_picture(&mut self, picture: DecodedPicture) {
        self(picture)
    }
}

enum Message {
    Register(Option<Box<dyn PixelConsumer>>),
    Picture(DecodedPicture),
}

/// Cheap handle used by the decode loop to submit pictures
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl DispatchHandle {
    /// Queue a picture for the consumer; never blocks.
    ///
    /// Returns `false` when the dispatcher thread is gone.
    pub fn dispatch(&self, picture: DecodedPicture) -> bool {
        self.tx.send(Message::Picture(picture)).is_ok()
    }
}

impl std::fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHandle").field("closed", &self.tx.is_closed()).finish()
    }
}

/// Owner of the dispatch thread
pub struct OutputDispatcher {
    tx: Option<mpsc::UnboundedSender<Message>>,
    thread: Option<JoinHandle<()>>,
}

impl OutputDispatcher {
    /// Start the dispatch thread
    pub fn spawn() -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let thread = std::thread::Builder::new()
            .name("output-dispatch".into())
            .spawn(move || run(rx))
            .map_err(|e| DecodeError::Dispatcher { details: format!("failed to spawn thread: {e}") })?;

        Ok(Self { tx: Some(tx), thread: Some(thread) })
    }

    pub fn handle(&self) -> Result<DispatchHandle> {
        self.sender().map(|tx| DispatchHandle { tx: tx.clone() })
    }

    /// Install `consumer`, replacing any previous one
    pub fn register(&self, consumer: impl PixelConsumer) -> Result<()> {
        self.send(Message::Register(Some(Box::new(consumer))))
    }

    /// Remove the current consumer; later pictures are dropped
    pub fn unregister(&self) -> Result<()> {
        self.send(Message::Register(None))
    }

    /// Close the channel and wait for queued pictures to be delivered.
    ///
    /// The thread only exits once every [`DispatchHandle`] is dropped as well.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.tx.take();
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        let joined = tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|e| DecodeError::Dispatcher { details: format!("join task failed: {e}") })?;
        joined.map_err(|_| DecodeError::Dispatcher { details: "dispatch thread panicked".into() })
    }

    fn sender(&self) -> Result<&mpsc::UnboundedSender<Message>> {
        self.tx
            .as_ref()
            .filter(|tx| !tx.is_closed())
            .ok_or_else(|| DecodeError::Dispatcher { details: "dispatcher is shut down".into() })
    }

    fn send(&self, message: Message) -> Result<()> {
        self.sender()?
            .send(message)
            .map_err(|_| DecodeError::Dispatcher { details: "dispatch thread exited".into() })
    }
}

impl Drop for OutputDispatcher {
    fn drop(&mut self) {
        // Closing the channel lets the thread drain and exit on its own.
        self.tx.take();
    }
}

fn run(mut rx: mpsc::UnboundedReceiver<Message>) {
    info!("Output dispatcher started");
    let mut consumer: Option<Box<dyn PixelConsumer>> = None;
    let mut delivered = 0u64;
    let mut dropped = 0u64;

    while let Some(message) = rx.blocking_recv() {
        match message {
            Message::Register(next) => {
                debug!(registered = next.is_some(), "Pixel consumer replaced");
                consumer = next;
            }
            Message::Picture(picture) => {
                let Some(target) = consumer.as_mut() else {
                    dropped += 1;
                    trace!(pts_us = picture.pts_us, "No pixel consumer, picture dropped");
                    continue;
                };

                let pts_us = picture.pts_us;
                if catch_unwind(AssertUnwindSafe(|| target.on_picture(picture))).is_err() {
                    error!(pts_us, "Pixel consumer panicked, unregistering it");
                    consumer = None;
                } else {
                    delivered += 1;
                }
            }
        }
    }

    info!(delivered, dropped, "Output dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    fn picture(pts_us: u64) -> DecodedPicture {
        DecodedPicture { pixels: vec![pts_us as u8; 6], width: 2, height: 2, pts_us }
    }

    #[tokio::test]
    async fn consumer_runs_on_dispatch_thread() -> anyhow::Result<()> {
        let mut dispatcher = OutputDispatcher::spawn()?;
        let (seen_tx, seen_rx) = std_mpsc::channel();
        dispatcher.register(move |p: DecodedPicture| {
            let name = std::thread::current().name().map(str::to_owned);
            let _ = seen_tx.send((p.pts_us, name));
        })?;

        let handle = dispatcher.handle()?;
        assert!(handle.dispatch(picture(1)));
        assert!(handle.dispatch(picture(2)));

        let first = seen_rx.recv_timeout(Duration::from_secs(2))?;
        let second = seen_rx.recv_timeout(Duration::from_secs(2))?;
        assert_eq!(first, (1, Some("output-dispatch".to_string())));
        assert_eq!(second.0, 2);

        drop(handle);
        dispatcher.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn pictures_without_consumer_are_dropped() -> anyhow::Result<()> {
        let mut dispatcher = OutputDispatcher::spawn()?;
        let handle = dispatcher.handle()?;
        assert!(handle.dispatch(picture(1)));

        let (seen_tx, seen_rx) = std_mpsc::channel();
        dispatcher.register(move |p: DecodedPicture| {
            let _ = seen_tx.send(p.pts_us);
        })?;
        assert!(handle.dispatch(picture(2)));

        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(2))?, 2);
        assert!(seen_rx.recv_timeout(Duration::from_millis(50)).is_err());

        drop(handle);
        dispatcher.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn panicking_consumer_is_unregistered() -> anyhow::Result<()> {
        let mut dispatcher = OutputDispatcher::spawn()?;
        fn faulty(_: DecodedPicture) {
            panic!("consumer bug");
        }
        dispatcher.register(faulty)?;
        let handle = dispatcher.handle()?;
        handle.dispatch(picture(1));

        let (seen_tx, seen_rx) = std_mpsc::channel();
        dispatcher.register(move |p: DecodedPicture| {
            let _ = seen_tx.send(p.pts_us);
        })?;
        handle.dispatch(picture(2));
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(2))?, 2);

        drop(handle);
        dispatcher.shutdown().await?;
        Ok(())
    }
}
