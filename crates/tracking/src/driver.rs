//! Runs a [`TrackingSession`] on its own task. The session is only touched by
//! that task; everybody else talks to it through a [`SessionHandle`].

use futures::StreamExt;
use model::TrackingId;
use tokio::{
    sync::{mpsc, oneshot},
    task::AbortHandle,
};

use crate::{
    adapter::ChannelMessage,
    generation::GenerationToken,
    session::{
        Job, JobOutcome, Opening, SessionConfig, SessionEvent, SessionView, TrackingDeps,
        TrackingSession,
    },
    TrackingResult,
};

const MAILBOX_SIZE: usize = 64;

#[derive(Debug)]
pub enum Command {
    Open {
        tracking_id: TrackingId,
        responder: oneshot::Sender<TrackingResult<()>>,
    },
    Refresh {
        responder: oneshot::Sender<TrackingResult<()>>,
    },
    Close {
        responder: oneshot::Sender<()>,
    },
    View {
        responder: oneshot::Sender<SessionView>,
    },
    Message {
        token: GenerationToken,
        message: ChannelMessage,
    },
    ChannelClosed {
        token: GenerationToken,
    },
    Completed(JobOutcome),
}

#[derive(Debug, Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Follows `tracking_id`, replacing whatever was followed before. An
    /// error means live updates are unavailable; the snapshot still loads.
    pub async fn open(&self, tracking_id: TrackingId) -> TrackingResult<()> {
        let (responder, response) = oneshot::channel();
        self.sender
            .send(Command::Open {
                tracking_id,
                responder,
            })
            .await?;
        response.await?
    }

    pub async fn refresh(&self) -> TrackingResult<()> {
        let (responder, response) = oneshot::channel();
        self.sender.send(Command::Refresh { responder }).await?;
        response.await?
    }

    pub async fn close(&self) -> TrackingResult<()> {
        let (responder, response) = oneshot::channel();
        self.sender.send(Command::Close { responder }).await?;
        Ok(response.await?)
    }

    pub async fn view(&self) -> TrackingResult<SessionView> {
        let (responder, response) = oneshot::channel();
        self.sender.send(Command::View { responder }).await?;
        Ok(response.await?)
    }
}

struct Driver {
    session: TrackingSession,
    mailbox: mpsc::WeakSender<Command>,
    /// Task forwarding the attached channel stream, if any.
    forwarder: Option<AbortHandle>,
}

impl Driver {
    async fn handle(&mut self, command: Command) {
        match command {
            Command::Open {
                tracking_id,
                responder,
            } => {
                if self.session.tracking_id() != Some(&tracking_id) {
                    self.detach();
                }
                let opening = self.session.begin(tracking_id);
                let result = self.start(opening).await;
                respond(responder, result);
            }
            Command::Refresh { responder } => {
                let result = match self.session.begin_refresh() {
                    Some(opening) => self.start(opening).await,
                    None => Ok(()),
                };
                respond(responder, result);
            }
            Command::Close { responder } => {
                self.detach();
                self.session.close().await;
                respond(responder, ());
            }
            Command::View { responder } => respond(responder, self.session.view()),
            Command::Message { token, message } => {
                if token.is_current() {
                    let jobs = self.session.apply(&message);
                    self.spawn_jobs(jobs);
                }
            }
            Command::ChannelClosed { token } => {
                if token.is_current() {
                    self.session.channel_lost();
                }
            }
            Command::Completed(outcome) => {
                let jobs = self.session.complete(outcome);
                self.spawn_jobs(jobs);
            }
        }
    }

    async fn start(&mut self, opening: Opening) -> TrackingResult<()> {
        let needs_subscribe = opening.needs_subscribe();
        self.spawn_jobs(opening.jobs);
        if needs_subscribe {
            self.session.subscribe().await?;
            self.attach().await;
        }
        Ok(())
    }

    fn spawn_jobs(&self, jobs: Vec<Job>) {
        for job in jobs {
            let deps = self.session.deps().clone();
            let mailbox = self.mailbox.clone();
            tokio::spawn(async move {
                let outcome = job.run(&deps).await;
                if let Some(mailbox) = mailbox.upgrade() {
                    let _ = mailbox.send(Command::Completed(outcome)).await;
                }
            });
        }
    }

    /// Stops forwarding and drops the channel stream.
    fn detach(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }

    /// Forwards the channel's messages into the mailbox until the stream ends,
    /// the session moves to another generation or it is detached.
    async fn attach(&mut self) {
        self.detach();
        let tracking_id = match self.session.tracking_id() {
            Some(tracking_id) => tracking_id.clone(),
            None => return,
        };
        let token = self.session.generation().token();
        let mut stream = match self.session.deps().channel.events(&tracking_id).await {
            Ok(stream) => stream,
            Err(why) => {
                log::warn!("could not attach to live updates for {}: {}", tracking_id, why);
                self.session.channel_lost();
                return;
            }
        };
        let mailbox = self.mailbox.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                if !token.is_current() {
                    return;
                }
                let Some(sender) = mailbox.upgrade() else {
                    return;
                };
                let command = Command::Message {
                    token: token.clone(),
                    message,
                };
                if sender.send(command).await.is_err() {
                    return;
                }
            }
            log::debug!("live updates for {} ended", tracking_id);
            if let Some(sender) = mailbox.upgrade() {
                let _ = sender.send(Command::ChannelClosed { token }).await;
            }
        });
        self.forwarder = Some(forwarder.abort_handle());
    }
}

fn respond<T>(responder: oneshot::Sender<T>, value: T) {
    if responder.send(value).is_err() {
        log::debug!("caller went away before the answer");
    }
}

/// Starts a session task. It runs until every handle is dropped, then closes
/// the session.
pub fn spawn_session(
    config: SessionConfig,
    deps: TrackingDeps,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
    let (events, event_receiver) = mpsc::unbounded_channel();
    let (sender, mut receiver) = mpsc::channel(MAILBOX_SIZE);
    let mut driver = Driver {
        session: TrackingSession::new(config, deps, events),
        mailbox: sender.downgrade(),
        forwarder: None,
    };

    tokio::spawn(async move {
        while let Some(command) = receiver.recv().await {
            driver.handle(command).await;
        }
        driver.detach();
        driver.session.close().await;
    });

    (SessionHandle { sender }, event_receiver)
}
