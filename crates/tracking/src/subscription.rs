use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::stream::BoxStream;
use model::{SubjectId, TrackingId};
use serde::Deserialize;

use crate::{
    adapter::{resolve_subject, ChannelMessage, WireId},
    SubscriptionFailure, TrackingError, TrackingResult,
};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "WireLatestFix")]
pub struct LatestFix {
    pub subject_id: Option<SubjectId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLatestFix {
    #[serde(default)]
    subject_id: Option<WireId>,
    #[serde(default)]
    driver_id: Option<WireId>,
    #[serde(default)]
    courier_id: Option<WireId>,
}

impl From<WireLatestFix> for LatestFix {
    fn from(wire: WireLatestFix) -> Self {
        Self {
            subject_id: resolve_subject(wire.subject_id, wire.driver_id, wire.courier_id),
        }
    }
}

/// Answer to a subscribe request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeAck {
    pub ok: bool,
    #[serde(default)]
    pub latest: Option<LatestFix>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SubscribeAck {
    pub fn identity(&self) -> Option<SubjectId> {
        self.latest.as_ref().and_then(|latest| latest.subject_id.clone())
    }
}

/// The live push channel of the backend.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn subscribe(&self, tracking_id: &TrackingId) -> TrackingResult<SubscribeAck>;

    /// Out-of-band pull of the newest fix, used to learn the courier when the
    /// ack did not name one.
    async fn latest(&self, tracking_id: &TrackingId) -> TrackingResult<Option<LatestFix>>;

    async fn unsubscribe(&self, tracking_id: &TrackingId) -> TrackingResult<()>;

    /// Messages published for `tracking_id` from now on.
    async fn events(
        &self,
        tracking_id: &TrackingId,
    ) -> TrackingResult<BoxStream<'static, ChannelMessage>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionState {
    Idle,
    Subscribing(TrackingId),
    Subscribed {
        tracking_id: TrackingId,
        identity: Option<SubjectId>,
        /// The ack named no courier and the identity came from a `latest`
        /// pull, or could not be resolved at all.
        degraded: bool,
    },
    Resubscribing {
        from: TrackingId,
        to: TrackingId,
    },
    Closed,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Subscribing(id) => write!(f, "subscribing to {}", id),
            Self::Subscribed {
                tracking_id,
                degraded: false,
                ..
            } => write!(f, "subscribed to {}", tracking_id),
            Self::Subscribed {
                tracking_id,
                degraded: true,
                ..
            } => write!(f, "subscribed to {} (degraded)", tracking_id),
            Self::Resubscribing { from, to } => write!(f, "switching from {} to {}", from, to),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// What `prepare` decided. On `Switch` the caller must discard everything it
/// holds for the previous id before calling `subscribe`.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Already subscribed (or subscribing) to this id.
    Unchanged,
    Fresh,
    Switch { previous: TrackingId },
}

pub struct SubscriptionManager {
    channel: Arc<dyn PushChannel>,
    state: SubscriptionState,
}

impl SubscriptionManager {
    pub fn new(channel: Arc<dyn PushChannel>) -> Self {
        Self {
            channel,
            state: SubscriptionState::Idle,
        }
    }

    pub fn state(&self) -> &SubscriptionState {
        &self.state
    }

    pub fn identity(&self) -> Option<&SubjectId> {
        match &self.state {
            SubscriptionState::Subscribed { identity, .. } => identity.as_ref(),
            _ => None,
        }
    }

    /// The id the manager is subscribed or subscribing to.
    pub fn tracking_id(&self) -> Option<&TrackingId> {
        match &self.state {
            SubscriptionState::Subscribing(id) => Some(id),
            SubscriptionState::Subscribed { tracking_id, .. } => Some(tracking_id),
            SubscriptionState::Resubscribing { to, .. } => Some(to),
            SubscriptionState::Idle | SubscriptionState::Closed => None,
        }
    }

    /// First half of `open`: moves into `Subscribing` or `Resubscribing`.
    pub fn prepare(&mut self, tracking_id: TrackingId) -> Transition {
        let (next, transition) = match &self.state {
            SubscriptionState::Subscribed {
                tracking_id: current,
                ..
            } if *current == tracking_id => return Transition::Unchanged,
            SubscriptionState::Subscribing(current) if *current == tracking_id => {
                return Transition::Unchanged
            }
            SubscriptionState::Subscribed {
                tracking_id: current,
                ..
            }
            | SubscriptionState::Subscribing(current) => (
                SubscriptionState::Resubscribing {
                    from: current.clone(),
                    to: tracking_id,
                },
                Transition::Switch {
                    previous: current.clone(),
                },
            ),
            SubscriptionState::Resubscribing { from, .. } => (
                SubscriptionState::Resubscribing {
                    from: from.clone(),
                    to: tracking_id,
                },
                Transition::Switch {
                    previous: from.clone(),
                },
            ),
            SubscriptionState::Idle | SubscriptionState::Closed => (
                SubscriptionState::Subscribing(tracking_id),
                Transition::Fresh,
            ),
        };
        log::debug!("subscription: {} -> {}", self.state, next);
        self.state = next;
        transition
    }

    /// Second half of `open`: performs the handshake for the prepared id.
    ///
    /// A failed handshake leaves the manager `Idle`; nothing is retried here.
    pub async fn subscribe(&mut self) -> TrackingResult<()> {
        let tracking_id = match &self.state {
            SubscriptionState::Subscribing(id) => id.clone(),
            SubscriptionState::Resubscribing { from, to } => {
                let (from, to) = (from.clone(), to.clone());
                if let Err(why) = self.channel.unsubscribe(&from).await {
                    log::warn!("unsubscribing from {} failed: {}", from, why);
                }
                self.state = SubscriptionState::Subscribing(to.clone());
                to
            }
            SubscriptionState::Subscribed { .. } => return Ok(()),
            SubscriptionState::Idle | SubscriptionState::Closed => {
                return Err(TrackingError::Other(
                    "subscribe called without a prepared tracking id".to_owned(),
                ))
            }
        };

        let ack = match self.channel.subscribe(&tracking_id).await {
            Ok(ack) if ack.ok => ack,
            Ok(ack) => {
                self.state = SubscriptionState::Idle;
                return Err(SubscriptionFailure::Rejected(ack.error).into());
            }
            Err(why) => {
                self.state = SubscriptionState::Idle;
                return Err(match why {
                    TrackingError::Subscription(failure) => TrackingError::Subscription(failure),
                    other => {
                        log::warn!("subscribe to {} failed: {}", tracking_id, other);
                        SubscriptionFailure::Disconnected.into()
                    }
                });
            }
        };

        let (identity, degraded) = match ack.identity() {
            Some(identity) => (Some(identity), false),
            None => {
                let pulled = match self.channel.latest(&tracking_id).await {
                    Ok(latest) => latest.and_then(|latest| latest.subject_id),
                    Err(why) => {
                        log::warn!("could not pull latest fix for {}: {}", tracking_id, why);
                        None
                    }
                };
                (pulled, true)
            }
        };
        log::info!(
            "subscribed to {} (courier {:?}{})",
            tracking_id,
            identity,
            if degraded { ", degraded" } else { "" }
        );
        self.state = SubscriptionState::Subscribed {
            tracking_id,
            identity,
            degraded,
        };
        Ok(())
    }

    pub async fn open(&mut self, tracking_id: TrackingId) -> TrackingResult<Transition> {
        let transition = self.prepare(tracking_id);
        if transition != Transition::Unchanged {
            self.subscribe().await?;
        }
        Ok(transition)
    }

    /// The transport lost the subscription. Back to `Idle`; the caller decides
    /// whether to open again.
    pub fn disconnected(&mut self) {
        if let SubscriptionState::Subscribed { tracking_id, .. } = &self.state {
            log::warn!("push channel for {} disconnected", tracking_id);
            self.state = SubscriptionState::Idle;
        }
    }

    /// Detaches from the channel. Valid in every state.
    pub async fn close(&mut self) {
        let attached = match &self.state {
            SubscriptionState::Subscribing(id) => Some(id.clone()),
            SubscriptionState::Subscribed { tracking_id, .. } => Some(tracking_id.clone()),
            SubscriptionState::Resubscribing { from, .. } => Some(from.clone()),
            SubscriptionState::Idle | SubscriptionState::Closed => None,
        };
        self.state = SubscriptionState::Closed;
        if let Some(id) = attached {
            if let Err(why) = self.channel.unsubscribe(&id).await {
                log::warn!("unsubscribing from {} failed: {}", id, why);
            }
        }
    }

    pub fn channel(&self) -> &Arc<dyn PushChannel> {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::stream;

    use super::*;

    #[derive(Default)]
    struct ScriptedChannel {
        acks: Mutex<Vec<TrackingResult<SubscribeAck>>>,
        latest: Option<&'static str>,
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PushChannel for ScriptedChannel {
        async fn subscribe(&self, tracking_id: &TrackingId) -> TrackingResult<SubscribeAck> {
            self.log.lock().unwrap().push(format!("subscribe {}", tracking_id));
            self.acks.lock().unwrap().remove(0)
        }

        async fn latest(&self, tracking_id: &TrackingId) -> TrackingResult<Option<LatestFix>> {
            self.log.lock().unwrap().push(format!("latest {}", tracking_id));
            Ok(Some(LatestFix {
                subject_id: self.latest.and_then(SubjectId::parse),
            }))
        }

        async fn unsubscribe(&self, tracking_id: &TrackingId) -> TrackingResult<()> {
            self.log.lock().unwrap().push(format!("unsubscribe {}", tracking_id));
            Ok(())
        }

        async fn events(
            &self,
            _tracking_id: &TrackingId,
        ) -> TrackingResult<BoxStream<'static, ChannelMessage>> {
            Ok(Box::pin(stream::empty()))
        }
    }

    fn ack_with(identity: Option<&str>) -> TrackingResult<SubscribeAck> {
        Ok(SubscribeAck {
            ok: true,
            latest: Some(LatestFix {
                subject_id: identity.and_then(SubjectId::parse),
            }),
            error: None,
        })
    }

    fn id(raw: &str) -> TrackingId {
        TrackingId::new(raw.to_owned())
    }

    fn manager(channel: ScriptedChannel) -> (SubscriptionManager, Arc<ScriptedChannel>) {
        let channel = Arc::new(channel);
        (SubscriptionManager::new(channel.clone()), channel)
    }

    #[tokio::test]
    async fn ack_with_identity_subscribes_directly() {
        let (mut manager, channel) = manager(ScriptedChannel {
            acks: Mutex::new(vec![ack_with(Some("drv-1"))]),
            ..Default::default()
        });
        assert_eq!(manager.open(id("a")).await.unwrap(), Transition::Fresh);
        assert_eq!(
            manager.state(),
            &SubscriptionState::Subscribed {
                tracking_id: id("a"),
                identity: SubjectId::parse("drv-1"),
                degraded: false,
            }
        );
        assert_eq!(*channel.log.lock().unwrap(), vec!["subscribe a"]);
    }

    #[tokio::test]
    async fn ack_without_identity_pulls_latest() {
        let (mut manager, channel) = manager(ScriptedChannel {
            acks: Mutex::new(vec![ack_with(None)]),
            latest: Some("drv-9"),
            ..Default::default()
        });
        manager.open(id("a")).await.unwrap();
        assert_eq!(manager.identity(), SubjectId::parse("drv-9").as_ref());
        assert!(matches!(
            manager.state(),
            SubscriptionState::Subscribed { degraded: true, .. }
        ));
        assert_eq!(*channel.log.lock().unwrap(), vec!["subscribe a", "latest a"]);
    }

    #[tokio::test]
    async fn rejected_ack_is_not_retried() {
        let (mut manager, channel) = manager(ScriptedChannel {
            acks: Mutex::new(vec![Ok(SubscribeAck {
                ok: false,
                latest: None,
                error: Some("unknown delivery".to_owned()),
            })]),
            ..Default::default()
        });
        let result = manager.open(id("a")).await;
        assert!(matches!(
            result,
            Err(TrackingError::Subscription(SubscriptionFailure::Rejected(Some(_))))
        ));
        assert_eq!(manager.state(), &SubscriptionState::Idle);
        assert_eq!(channel.log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn switching_unsubscribes_first() {
        let (mut manager, channel) = manager(ScriptedChannel {
            acks: Mutex::new(vec![ack_with(Some("drv-1")), ack_with(Some("drv-2"))]),
            ..Default::default()
        });
        manager.open(id("a")).await.unwrap();
        assert_eq!(manager.open(id("a")).await.unwrap(), Transition::Unchanged);

        assert_eq!(
            manager.prepare(id("b")),
            Transition::Switch { previous: id("a") }
        );
        assert_eq!(
            manager.state(),
            &SubscriptionState::Resubscribing {
                from: id("a"),
                to: id("b")
            }
        );
        manager.subscribe().await.unwrap();
        assert_eq!(manager.identity(), SubjectId::parse("drv-2").as_ref());
        assert_eq!(
            *channel.log.lock().unwrap(),
            vec!["subscribe a", "unsubscribe a", "subscribe b"]
        );
    }

    #[tokio::test]
    async fn close_detaches_from_any_state() {
        let (mut manager, channel) = manager(ScriptedChannel {
            acks: Mutex::new(vec![ack_with(Some("drv-1"))]),
            ..Default::default()
        });
        manager.close().await;
        assert_eq!(manager.state(), &SubscriptionState::Closed);
        assert!(channel.log.lock().unwrap().is_empty());

        manager.open(id("a")).await.unwrap();
        manager.close().await;
        assert_eq!(manager.state(), &SubscriptionState::Closed);
        assert_eq!(manager.tracking_id(), None);
        assert_eq!(*channel.log.lock().unwrap(), vec!["subscribe a", "unsubscribe a"]);
    }

    #[test]
    fn latest_fix_prefers_subject_id_over_legacy_names() {
        let fix: LatestFix = serde_json::from_value(serde_json::json!({
            "subjectId": "drv-1",
            "driverId": "drv-legacy"
        }))
        .unwrap();
        assert_eq!(fix.subject_id, SubjectId::parse("drv-1"));

        let fix: LatestFix =
            serde_json::from_value(serde_json::json!({ "courierId": 17 })).unwrap();
        assert_eq!(fix.subject_id, SubjectId::parse("17"));
    }
}
