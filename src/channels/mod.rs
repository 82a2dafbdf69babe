//! Provider Adapter Layer (spec.md §4.5).
//!
//! Each module owns one inbound `/webhook/<provider>` endpoint (or a
//! verification handshake, for WhatsApp's `GET`) and performs: method
//! check -> signature/secret verification -> raw-body decode ->
//! normalization into a [`UserMessage`] -> [`Pipeline::process_message`] ->
//! platform-specific reply delivery. None of them re-implement business
//! rules; that is the pipeline's job alone.

pub mod common;
pub mod dedup;
pub mod discord;
pub mod line;
pub mod slack;
pub mod teams;
pub mod telegram;
pub mod terminal;
pub mod whatsapp;

use std::sync::Arc;

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::repository::Repositories;
use dedup::MessageDedup;

/// Shared state every adapter handler needs: the pipeline to call into,
/// the loaded provider credentials, an HTTP client for outbound
/// replies/verification calls, read-only repository access for the
/// Terminal dev surface's user-summary endpoint, and the best-effort
/// duplicate-delivery guard (SPEC_FULL.md §9).
#[derive(Clone)]
pub struct ChannelState {
    pub pipeline: Arc<Pipeline>,
    pub config: Arc<Config>,
    pub repos: Arc<Repositories>,
    pub dedup: Arc<MessageDedup>,
    pub http: reqwest::Client,
}

impl ChannelState {
    pub fn new(pipeline: Arc<Pipeline>, config: Arc<Config>, repos: Arc<Repositories>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("building outbound reqwest client");
        Self {
            pipeline,
            config,
            repos,
            dedup: Arc::new(MessageDedup::new()),
            http,
        }
    }
}
