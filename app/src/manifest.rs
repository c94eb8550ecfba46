use crate::error::Error;
use crate::mood::Topic;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_derive::{Deserialize, Serialize};
use std::path::PathBuf;

/// What an actor says unprompted (`output`) and how it answers (`input`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Exchange {
    pub output: String,
    pub input: String,
}

impl Exchange {
    pub fn new(output: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            input: input.into(),
        }
    }
}

/// One personality: the exchanges available under every topic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Conversation {
    /// Only used in logs
    pub name: Option<String>,
    pub hello: Vec<Exchange>,
    pub goodbye: Vec<Exchange>,
    pub conversation: Vec<Exchange>,
    pub asleep: Vec<Exchange>,
    pub angry: Vec<Exchange>,
    pub shiny: Vec<Exchange>,
}

impl Conversation {
    pub fn exchanges(&self, topic: Topic) -> &[Exchange] {
        match topic {
            Topic::Hello => &self.hello,
            Topic::Goodbye => &self.goodbye,
            Topic::Conversation => &self.conversation,
            Topic::Asleep => &self.asleep,
            Topic::Angry => &self.angry,
            Topic::Shiny => &self.shiny,
        }
    }

    /// Uniform pick within `topic`; an empty topic is a configuration error.
    pub fn pick<R: Rng + ?Sized>(&self, topic: Topic, rng: &mut R) -> Result<&Exchange, Error> {
        self.exchanges(topic).choose(rng).ok_or_else(|| {
            Error::configuration(format!(
                "conversation {} has no exchanges for topic {topic}",
                self.label()
            ))
        })
    }

    pub fn require(&self, topics: &[Topic]) -> Result<(), Error> {
        match topics.iter().find(|topic| self.exchanges(**topic).is_empty()) {
            Some(topic) => Err(Error::configuration(format!(
                "conversation {} has no exchanges for topic {topic}",
                self.label()
            ))),
            None => Ok(()),
        }
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConversationManifest {
    pub conversations: Vec<Conversation>,
}

impl ConversationManifest {
    /// Chooses the personality an actor keeps for its whole life.
    pub fn pick_personality<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Conversation, Error> {
        self.conversations
            .choose(rng)
            .cloned()
            .ok_or_else(|| Error::configuration("conversation manifest is empty"))
    }
}

pub static DEV: Lazy<ConversationManifest> = Lazy::new(|| ConversationManifest {
    conversations: vec![
        Conversation {
            name: Some("polite".to_string()),
            hello: vec![
                Exchange::new("Hello everyone!", "Oh, hello there."),
                Exchange::new("Good morning, all.", "Morning!"),
            ],
            goodbye: vec![Exchange::new("I must be going, goodbye!", "Farewell, friend.")],
            conversation: vec![
                Exchange::new("How are you today?", "Quite well, thank you."),
                Exchange::new("Lovely weather, isn't it?", "It really is."),
                Exchange::new("Read anything good lately?", "A book about clouds."),
            ],
            asleep: vec![Exchange::new("zzzz...", "mmph... five more minutes")],
            angry: vec![Exchange::new("Why is everyone so loud?", "Leave me alone!")],
            shiny: vec![Exchange::new("Ooh, what is that?", "So... shiny...")],
        },
        Conversation {
            name: Some("unix".to_string()),
            hello: vec![Exchange::new("EHLO", "250 OK")],
            goodbye: vec![Exchange::new("QUIT", "221 Bye")],
            conversation: vec![
                Exchange::new("PING", "PONG"),
                Exchange::new("SYN", "SYN-ACK"),
            ],
            asleep: vec![Exchange::new("SIGSTOP", "...")],
            angry: vec![Exchange::new("Out of memory: kill process", "SIGKILL")],
            shiny: vec![Exchange::new("New kernel available!", "Rebooting...")],
        },
    ],
});

/// Accepts `dev`, an inline JSON document, or a path to a JSON file.
pub fn manifest_value_parser(s: &str) -> eyre::Result<ConversationManifest, eyre::Error> {
    Ok(match s {
        "dev" => DEV.clone(),
        inline if inline.trim_start().starts_with('{') => serde_json::from_str(inline)?,
        _ => {
            let raw = std::fs::read_to_string(PathBuf::from(s))?;
            serde_json::from_str(&raw)?
        }
    })
}
