//! The joke-writing task used across scenarios, with scripted models.

use promptc_common::{Example, ModuleKind};
use promptc_core::testing::ScriptedModel;
use promptc_core::{build_signature, LmResponse, MemoryStore, ProgramRecord, Signature};
use std::sync::Arc;

pub const JUDGE_ID: &str = "JokeJudge";

pub const JOKES: &[(&str, &str)] = &[
    ("cats", "My cat only laughs at purr-puns."),
    ("dogs", "Dogs can't operate MRI machines, but catscan."),
    ("birds", "Birds are just drones that run on seeds."),
];

pub fn joke_signature() -> Signature {
    build_signature(
        &["topic"],
        &["joke"],
        "Write a short joke about the topic.",
        Some(&["subject of the joke"][..]),
        Some(&["one or two sentences"][..]),
    )
    .expect("valid joke signature")
}

pub fn joke_dataset() -> Vec<Example> {
    JOKES
        .iter()
        .map(|(topic, joke)| Example::new().with("topic", *topic).with("joke", *joke))
        .collect()
}

/// Task model answering with the dataset joke for known topics.
pub fn joke_model() -> ScriptedModel {
    ScriptedModel::new("gpt-4o-mini").lookup("topic", "joke", JOKES)
}

pub fn judge_signature() -> Signature {
    build_signature(
        &["topic", "joke"],
        &["score"],
        "Rate how funny the joke is about the topic, from 0 to 1.",
        None,
        None,
    )
    .expect("valid judge signature")
}

/// Judge model: cats 0.9, dogs 0, birds 0.75, with chatter around the number.
pub fn judge_model() -> ScriptedModel {
    ScriptedModel::new("judge").respond_with(|request| {
        let score = match request.inputs.get("topic") {
            Some("cats") => "0.9 (solid pun)",
            Some("birds") => "Score: 0.75, plausible",
            _ => "0",
        };
        LmResponse::default().with_field("score", score)
    })
}

/// Memory store holding only the judge's record.
pub async fn store_with_judge() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_record(ProgramRecord::new(
            JUDGE_ID,
            &judge_signature(),
            ModuleKind::Predict,
        ))
        .await;
    store
}
