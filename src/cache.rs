//! Write-through webhook cache.
//!
//! Caches the webhook rows keyed by webhook id, plus the set of link-level
//! webhook ids per link. Entries are pure performance optimizations - the
//! relational store remains the source of truth and `rebuild` can repopulate
//! the cache from it at any time. Every mutation path that changes webhook
//! rows calls through here synchronously rather than relying on implicit
//! hooks.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use rusqlite::Connection;

use crate::db::from_row::{query_all, WEBHOOK_COLS};
use crate::error::Result;
use crate::models::{Webhook, TRIGGER_CLICK_CREATED};

#[derive(Default)]
pub struct WebhookCache {
    /// webhook id -> webhook row
    webhooks: RwLock<HashMap<String, Webhook>>,
    /// link id -> ids of link-level webhooks scoped to it
    link_index: RwLock<HashMap<String, HashSet<String>>>,
}

impl WebhookCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, webhook_id: &str) -> Option<Webhook> {
        self.webhooks.read().unwrap().get(webhook_id).cloned()
    }

    pub fn set(&self, webhook: Webhook) {
        self.webhooks
            .write()
            .unwrap()
            .insert(webhook.id.clone(), webhook);
    }

    pub fn mset(&self, webhooks: Vec<Webhook>) {
        let mut map = self.webhooks.write().unwrap();
        for webhook in webhooks {
            map.insert(webhook.id.clone(), webhook);
        }
    }

    pub fn delete(&self, webhook_id: &str) {
        self.webhooks.write().unwrap().remove(webhook_id);
        let mut index = self.link_index.write().unwrap();
        for ids in index.values_mut() {
            ids.remove(webhook_id);
        }
    }

    pub fn delete_many(&self, webhook_ids: &[String]) {
        let mut map = self.webhooks.write().unwrap();
        for id in webhook_ids {
            map.remove(id);
        }
        drop(map);
        let mut index = self.link_index.write().unwrap();
        for ids in index.values_mut() {
            for id in webhook_ids {
                ids.remove(id);
            }
        }
    }

    /// Replace the link-scoping entries for one webhook.
    pub fn set_link_scope(&self, webhook_id: &str, link_ids: &[String]) {
        let mut index = self.link_index.write().unwrap();
        for ids in index.values_mut() {
            ids.remove(webhook_id);
        }
        for link_id in link_ids {
            index
                .entry(link_id.clone())
                .or_default()
                .insert(webhook_id.to_string());
        }
    }

    /// Ids of link-level webhooks scoped to `link_id`.
    pub fn webhook_ids_for_link(&self, link_id: &str) -> HashSet<String> {
        self.link_index
            .read()
            .unwrap()
            .get(link_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Rebuild the whole cache from the relational store.
    pub fn rebuild(&self, conn: &Connection) -> Result<usize> {
        let webhooks: Vec<Webhook> = query_all(
            conn,
            &format!("SELECT {} FROM webhooks WHERE disabled_at IS NULL", WEBHOOK_COLS),
            &[],
        )?;
        let count = webhooks.len();

        let mut index: HashMap<String, HashSet<String>> = HashMap::new();
        for webhook in &webhooks {
            // Only click-subscribed, link-scoped webhooks participate in the
            // per-link index (the link-level invariant)
            if !webhook.has_trigger(TRIGGER_CLICK_CREATED) {
                continue;
            }
            for link_id in crate::db::queries::get_webhook_link_ids(conn, &webhook.id)? {
                index
                    .entry(link_id)
                    .or_default()
                    .insert(webhook.id.clone());
            }
        }

        *self.webhooks.write().unwrap() = webhooks
            .into_iter()
            .map(|w| (w.id.clone(), w))
            .collect();
        *self.link_index.write().unwrap() = index;
        Ok(count)
    }
}
