//! Test doubles for the external edges of the service layer

use crate::integrations::{
    EmailSender, EspCampaign, EspClient, EspContact, IntegrationError, OutgoingEmail,
    SocialPublisher,
};
use crate::models::{AutomationEvent, CampaignStats, PublishReceipt, SocialPost, TriggerType};
use crate::services::automation::EventDispatcher;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Dispatcher that keeps every event for assertions
#[derive(Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<AutomationEvent>>,
}

impl RecordingDispatcher {
    pub fn events(&self) -> Vec<AutomationEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn triggers(&self) -> Vec<TriggerType> {
        self.events().into_iter().map(|e| e.trigger).collect()
    }
}

impl EventDispatcher for RecordingDispatcher {
    fn dispatch(&self, event: AutomationEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Publisher that succeeds or fails on demand and counts calls
#[derive(Default)]
pub struct StubPublisher {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl StubPublisher {
    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.set_failing(true);
        publisher
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SocialPublisher for StubPublisher {
    async fn publish(&self, post: &SocialPost) -> Result<PublishReceipt, IntegrationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(IntegrationError::Api {
                status: 400,
                message: "duplicate post".into(),
            });
        }
        Ok(PublishReceipt {
            external_id: format!("ext-{}", post.id),
            url: None,
        })
    }
}

/// In-memory ESP
#[derive(Default)]
pub struct FakeEsp {
    fail_send: AtomicBool,
    hold: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
    pub contacts: Mutex<Vec<EspContact>>,
    pub unsubscribed: Mutex<Vec<String>>,
    /// Addresses the ESP will not mail until a contact upsert clears them
    pub blacklisted: Mutex<Vec<String>>,
    pub campaigns: Mutex<Vec<EspCampaign>>,
    pub sends: Mutex<Vec<String>>,
}

impl FakeEsp {
    pub fn failing_sends() -> Self {
        let esp = Self::default();
        esp.set_failing_sends(true);
        esp
    }

    pub fn set_failing_sends(&self, failing: bool) {
        self.fail_send.store(failing, Ordering::SeqCst);
    }

    /// Park every later send until the returned release is notified.
    /// The first handle is notified each time a send parks.
    pub fn hold_sends(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.hold.lock().unwrap() = Some((entered.clone(), release.clone()));
        (entered, release)
    }

    pub fn is_blacklisted(&self, email: &str) -> bool {
        self.blacklisted.lock().unwrap().iter().any(|e| e == email)
    }
}

#[async_trait]
impl EspClient for FakeEsp {
    async fn upsert_contact(&self, contact: &EspContact) -> Result<String, IntegrationError> {
        self.blacklisted.lock().unwrap().retain(|e| e != &contact.email);
        let mut contacts = self.contacts.lock().unwrap();
        contacts.push(contact.clone());
        Ok(format!("contact-{}", contacts.len()))
    }

    async fn unsubscribe_contact(&self, email: &str) -> Result<(), IntegrationError> {
        self.unsubscribed.lock().unwrap().push(email.to_string());
        let mut blacklisted = self.blacklisted.lock().unwrap();
        if !blacklisted.iter().any(|e| e == email) {
            blacklisted.push(email.to_string());
        }
        Ok(())
    }

    async fn create_campaign(&self, campaign: &EspCampaign) -> Result<String, IntegrationError> {
        let mut campaigns = self.campaigns.lock().unwrap();
        campaigns.push(campaign.clone());
        Ok(format!("{}", 100 + campaigns.len()))
    }

    async fn send_campaign(&self, campaign_id: &str) -> Result<(), IntegrationError> {
        let hold = self.hold.lock().unwrap().clone();
        if let Some((entered, release)) = hold {
            entered.notify_one();
            release.notified().await;
        }
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(IntegrationError::Api {
                status: 400,
                message: "sender not verified".into(),
            });
        }
        self.sends.lock().unwrap().push(campaign_id.to_string());
        Ok(())
    }

    async fn campaign_stats(&self, _campaign_id: &str) -> Result<CampaignStats, IntegrationError> {
        Ok(CampaignStats {
            opens: 40,
            clicks: 12,
            unsubscribes: 1,
        })
    }
}

/// Mailer that stores messages instead of sending them
#[derive(Default)]
pub struct InboxMailer {
    failing: AtomicBool,
    pub sent: Mutex<Vec<OutgoingEmail>>,
}

impl InboxMailer {
    pub fn failing() -> Self {
        let mailer = Self::default();
        mailer.failing.store(true, Ordering::SeqCst);
        mailer
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|e| e.to.clone()).collect()
    }
}

#[async_trait]
impl EmailSender for InboxMailer {
    fn is_configured(&self) -> bool {
        true
    }

    async fn send(&self, email: OutgoingEmail) -> Result<(), IntegrationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(IntegrationError::Smtp("connection refused".into()));
        }
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}
