//! Moods, topics and the table connecting them.

use crate::error::Error;
use serde_derive::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Prefix of every event type on the bus, followed by the topic key.
pub const EVENT_TYPE_PREFIX: &str = "io.chatter.message.";

/// Category of exchanges; maps 1:1 onto the event type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Hello,
    Goodbye,
    Conversation,
    Asleep,
    Angry,
    /// The distraction topic: hearing it entrances an actor for good
    Shiny,
}

impl Topic {
    pub const DISTRACTION: Topic = Topic::Shiny;

    pub fn event_type(&self) -> String {
        format!("{EVENT_TYPE_PREFIX}{}", self.as_ref())
    }

    pub fn from_event_type(event_type: &str) -> Option<Topic> {
        event_type.strip_prefix(EVENT_TYPE_PREFIX)?.parse().ok()
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, AsRefStr, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    #[default]
    Neutral,
    Asleep,
    Angry,
    Entranced,
}

/// Why an exchange is being selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Intro,
    SelfInitiated,
    Reply(Topic),
    Farewell,
}

impl Mood {
    /// Boot-time mood from the configured flags.
    pub fn initial(asleep: bool, angry: bool) -> Result<Mood, Error> {
        match (asleep, angry) {
            (true, true) => Err(Error::configuration(
                "an actor cannot be both asleep and angry",
            )),
            (true, false) => Ok(Mood::Asleep),
            (false, true) => Ok(Mood::Angry),
            (false, false) => Ok(Mood::Neutral),
        }
    }

    /// Mood after accepting an event of `topic`. Entranced is absorbing.
    pub fn after_event(self, topic: Topic) -> Mood {
        if topic == Topic::DISTRACTION {
            Mood::Entranced
        } else {
            self
        }
    }

    /// The precedence table: mood first, then what the exchange is for.
    pub fn topic_for(self, purpose: Purpose) -> Topic {
        match self {
            Mood::Entranced => Topic::Shiny,
            Mood::Asleep => Topic::Asleep,
            Mood::Angry => Topic::Angry,
            Mood::Neutral => match purpose {
                Purpose::Intro => Topic::Hello,
                Purpose::SelfInitiated => Topic::Conversation,
                Purpose::Reply(topic) => topic,
                Purpose::Farewell => Topic::Goodbye,
            },
        }
    }

    /// Topics that must resolve for this mood before the actor may start.
    pub fn required_topics(self) -> Vec<Topic> {
        match self {
            Mood::Neutral => vec![Topic::Hello, Topic::Conversation],
            other => vec![other.topic_for(Purpose::Intro)],
        }
    }

    /// Sleep-talk is addressed to everyone; every other mood needs a listener.
    pub fn self_initiation_is_peer_directed(self) -> bool {
        !matches!(self, Mood::Asleep)
    }
}
