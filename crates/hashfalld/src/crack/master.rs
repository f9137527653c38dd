//! Master actor: hands out hint and password tasks and collects results.
//!
//! Hint work comes first: for every char set in the input, one `HintBatch`
//! per subset with a single character left out, carrying every hint hash of
//! every person using that char set. A hint match rules that character out
//! for the person it belongs to. Once a person's hints are all resolved (or
//! all hint work is done) a `PasswordTask` over the remaining characters is
//! queued. Each registered worker holds at most one task at a time.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use tokio::sync::oneshot;

use hashfall_core::ActorPath;
use hashfall_services::{Actor, Context, Envelope, ProxySettings};

use super::charset::CharSetManager;
use super::messages::{HintBatch, HintsCracked, PasswordCracked, PasswordTask, Register};
use super::person::Person;

enum Task {
    Hints(HintBatch),
    Password(PasswordTask),
}

/// One recovered (or unrecoverable) password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered {
    pub person_id: u32,
    pub name: String,
    pub password: Option<String>,
}

pub struct Master {
    proxy: ProxySettings,
    persons: BTreeMap<u32, Person>,
    queue: VecDeque<Task>,
    idle: VecDeque<ActorPath>,
    busy: HashMap<ActorPath, Task>,
    hint_batches_left: usize,
    password_queued: HashSet<u32>,
    recovered: BTreeMap<u32, Recovered>,
    on_finished: Option<oneshot::Sender<Vec<Recovered>>>,
}

impl Master {
    pub fn new(persons: Vec<Person>, proxy: ProxySettings) -> Self {
        let persons: BTreeMap<u32, Person> = persons.into_iter().map(|p| (p.id, p)).collect();

        // hint hashes grouped by char set
        let mut by_charset: BTreeMap<Vec<char>, Vec<String>> = BTreeMap::new();
        for person in persons.values() {
            by_charset
                .entry(CharSetManager::new(&person.charset).chars().to_vec())
                .or_default()
                .extend(person.hint_hashes.iter().cloned());
        }

        let mut queue = VecDeque::new();
        for (charset, hashes) in by_charset {
            if hashes.is_empty() {
                continue;
            }
            for subset in CharSetManager::new(&charset).subsets() {
                queue.push_back(Task::Hints(HintBatch {
                    chars: subset.chars,
                    excluded: subset.excluded,
                    hashes: hashes.clone(),
                }));
            }
        }

        let mut master = Self {
            proxy,
            hint_batches_left: queue.len(),
            persons,
            queue,
            idle: VecDeque::new(),
            busy: HashMap::new(),
            password_queued: HashSet::new(),
            recovered: BTreeMap::new(),
            on_finished: None,
        };
        master.queue_ready_passwords();
        master
    }

    /// Receive every result once all persons are done.
    pub fn on_finished(mut self, done: oneshot::Sender<Vec<Recovered>>) -> Self {
        self.on_finished = Some(done);
        self
    }

    /// Queue password tasks for persons whose char set is final.
    fn queue_ready_passwords(&mut self) {
        let hints_done = self.hint_batches_left == 0;
        for person in self.persons.values() {
            if self.password_queued.contains(&person.id) {
                continue;
            }
            if person.has_all_hints() || hints_done {
                self.password_queued.insert(person.id);
                self.queue.push_back(Task::Password(PasswordTask {
                    person_id: person.id,
                    chars: person.remaining(),
                    length: person.password_length,
                    hash: person.password_hash.clone(),
                }));
            }
        }
    }

    fn dispatch(&mut self, ctx: &Context) {
        while !self.queue.is_empty() {
            let Some(worker) = self.idle.pop_front() else {
                return;
            };
            let Some(task) = self.queue.pop_front() else {
                self.idle.push_front(worker);
                return;
            };
            let sent = match &task {
                Task::Hints(batch) => ctx.send_large(&worker, batch.clone()),
                Task::Password(password) => ctx.send_large(&worker, password.clone()),
            };
            match sent {
                Ok(()) => {
                    self.busy.insert(worker, task);
                }
                Err(e) => {
                    tracing::warn!(worker = %worker, error = %e, "could not hand out task");
                    self.queue.push_front(task);
                    return;
                }
            }
        }
    }

    fn release(&mut self, worker: Option<ActorPath>) {
        if let Some(worker) = worker {
            self.busy.remove(&worker);
            if !self.idle.contains(&worker) {
                self.idle.push_back(worker);
            }
        }
    }

    fn on_hints(&mut self, result: HintsCracked) {
        self.hint_batches_left = self.hint_batches_left.saturating_sub(1);
        let matched: HashSet<&str> = result.matched.iter().map(String::as_str).collect();
        for person in self.persons.values_mut() {
            let hits = person
                .hint_hashes
                .iter()
                .filter(|h| matched.contains(h.as_str()))
                .count();
            if hits > 0 && person.drop_char(result.excluded) {
                tracing::debug!(person = %person.name, excluded = %result.excluded, "char ruled out");
            }
        }
        self.queue_ready_passwords();
    }

    fn on_password(&mut self, result: PasswordCracked) {
        let name = self
            .persons
            .get(&result.person_id)
            .map(|p| p.name.clone())
            .unwrap_or_default();
        match &result.password {
            Some(password) => tracing::info!(person = %name, %password, "password recovered"),
            None => tracing::warn!(person = %name, "password not found"),
        }
        self.recovered.insert(
            result.person_id,
            Recovered {
                person_id: result.person_id,
                name,
                password: result.password,
            },
        );
    }

    fn finish_if_done(&mut self) {
        if self.recovered.len() < self.persons.len() {
            return;
        }
        let Some(done) = self.on_finished.take() else {
            return;
        };
        let found = self.recovered.values().filter(|r| r.password.is_some()).count();
        tracing::info!(persons = self.persons.len(), found, "all passwords processed");
        let _ = done.send(self.recovered.values().cloned().collect());
    }
}

#[async_trait]
impl Actor for Master {
    async fn started(&mut self, ctx: &mut Context) {
        if let Err(e) = ctx.attach_proxy(self.proxy.clone()) {
            tracing::error!(master = %ctx.myself(), error = %e, "failed to start proxy");
            ctx.stop();
            return;
        }
        tracing::info!(
            master = %ctx.myself(),
            persons = self.persons.len(),
            tasks = self.queue.len(),
            "master ready"
        );
        self.finish_if_done();
    }

    async fn handle(&mut self, ctx: &mut Context, envelope: Envelope) {
        let envelope = match envelope.take::<Register>() {
            Ok((Some(worker), Register)) => {
                tracing::info!(worker = %worker, "worker registered");
                self.release(Some(worker));
                return self.dispatch(ctx);
            }
            Ok((None, Register)) => return,
            Err(envelope) => envelope,
        };
        let envelope = match envelope.take::<HintsCracked>() {
            Ok((worker, result)) => {
                self.release(worker);
                self.on_hints(result);
                return self.dispatch(ctx);
            }
            Err(envelope) => envelope,
        };
        match envelope.take::<PasswordCracked>() {
            Ok((worker, result)) => {
                self.release(worker);
                self.on_password(result);
                self.finish_if_done();
                self.dispatch(ctx);
            }
            Err(envelope) => tracing::warn!(?envelope, "master got unexpected message"),
        }
    }
}
