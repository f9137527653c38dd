//! Messages exchanged between master and workers.
//!
//! Task and result messages can carry thousands of hashes, so they travel
//! through the large-message proxies. `Register` is small and goes directly.

use serde::{Deserialize, Serialize};

use hashfall_core::{Payload, PayloadCodec};

/// A worker announcing itself to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register;

impl Payload for Register {
    const MANIFEST: &'static str = "hashfall.crack.Register";
}

/// Hash every permutation of `chars` and report which of `hashes` occur.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintBatch {
    pub chars: Vec<char>,
    pub excluded: char,
    pub hashes: Vec<String>,
}

impl Payload for HintBatch {
    const MANIFEST: &'static str = "hashfall.crack.HintBatch";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintsCracked {
    pub excluded: char,
    pub matched: Vec<String>,
}

impl Payload for HintsCracked {
    const MANIFEST: &'static str = "hashfall.crack.HintsCracked";
}

/// Find the `length`-character word over `chars` whose hash is `hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordTask {
    pub person_id: u32,
    pub chars: Vec<char>,
    pub length: usize,
    pub hash: String,
}

impl Payload for PasswordTask {
    const MANIFEST: &'static str = "hashfall.crack.PasswordTask";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordCracked {
    pub person_id: u32,
    /// `None` if no candidate matched.
    pub password: Option<String>,
}

impl Payload for PasswordCracked {
    const MANIFEST: &'static str = "hashfall.crack.PasswordCracked";
}

/// Register the cracking messages with a node's codec.
pub fn register_all(codec: &PayloadCodec) {
    codec.register::<Register>();
    codec.register::<HintBatch>();
    codec.register::<HintsCracked>();
    codec.register::<PasswordTask>();
    codec.register::<PasswordCracked>();
}
