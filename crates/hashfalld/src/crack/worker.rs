//! Worker actor: brute-forces hints and passwords handed out by the master.

use std::collections::HashSet;

use async_trait::async_trait;

use hashfall_core::ActorPath;
use hashfall_services::{Actor, Context, Envelope, ProxySettings};

use super::hash::{for_each_permutation, for_each_word, sha256_hex};
use super::messages::{HintBatch, HintsCracked, PasswordCracked, PasswordTask, Register};

pub struct Worker {
    master: ActorPath,
    proxy: ProxySettings,
}

impl Worker {
    pub fn new(master: ActorPath, proxy: ProxySettings) -> Self {
        Self { master, proxy }
    }
}

/// Which of `batch.hashes` are hashes of a permutation of `batch.chars`.
pub fn crack_hints(batch: &HintBatch) -> Vec<String> {
    let wanted: HashSet<&str> = batch.hashes.iter().map(String::as_str).collect();
    let mut matched = Vec::new();
    let mut candidate = String::with_capacity(batch.chars.len() * 4);

    for_each_permutation(&batch.chars, |permutation| {
        candidate.clear();
        candidate.extend(permutation);
        let hash = sha256_hex(&candidate);
        if wanted.contains(hash.as_str()) && !matched.contains(&hash) {
            matched.push(hash);
        }
        matched.len() < wanted.len()
    });
    matched
}

/// The word of `task.length` characters over `task.chars` hashing to
/// `task.hash`, if there is one.
pub fn crack_password(task: &PasswordTask) -> Option<String> {
    let mut found = None;
    for_each_word(&task.chars, task.length, |word| {
        if sha256_hex(word) == task.hash {
            found = Some(word.to_string());
            return false;
        }
        true
    });
    found
}

#[async_trait]
impl Actor for Worker {
    async fn started(&mut self, ctx: &mut Context) {
        if let Err(e) = ctx.attach_proxy(self.proxy.clone()) {
            tracing::error!(worker = %ctx.myself(), error = %e, "failed to start proxy");
            ctx.stop();
            return;
        }
        match ctx.tell(&self.master, Register).await {
            Ok(()) => tracing::info!(worker = %ctx.myself(), master = %self.master, "registered"),
            Err(e) => tracing::warn!(worker = %ctx.myself(), error = %e, "registration failed"),
        }
    }

    async fn handle(&mut self, ctx: &mut Context, envelope: Envelope) {
        let envelope = match envelope.take::<HintBatch>() {
            Ok((sender, batch)) => {
                let reply_to = sender.unwrap_or_else(|| self.master.clone());
                tracing::debug!(excluded = %batch.excluded, hashes = batch.hashes.len(), "cracking hints");
                let excluded = batch.excluded;
                let matched = match tokio::task::spawn_blocking(move || crack_hints(&batch)).await {
                    Ok(matched) => matched,
                    Err(e) => {
                        tracing::error!(error = %e, "hint cracking panicked");
                        Vec::new()
                    }
                };
                if let Err(e) = ctx.send_large(&reply_to, HintsCracked { excluded, matched }) {
                    tracing::warn!(error = %e, "failed to report hints");
                }
                return;
            }
            Err(envelope) => envelope,
        };

        match envelope.take::<PasswordTask>() {
            Ok((sender, task)) => {
                let reply_to = sender.unwrap_or_else(|| self.master.clone());
                let person_id = task.person_id;
                tracing::debug!(person_id, length = task.length, "cracking password");
                let password = match tokio::task::spawn_blocking(move || crack_password(&task)).await {
                    Ok(password) => password,
                    Err(e) => {
                        tracing::error!(error = %e, "password cracking panicked");
                        None
                    }
                };
                if let Err(e) = ctx.send_large(&reply_to, PasswordCracked { person_id, password }) {
                    tracing::warn!(error = %e, "failed to report password");
                }
            }
            Err(envelope) => tracing::warn!(?envelope, "worker got unexpected message"),
        }
    }
}
