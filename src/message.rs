use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The nine planetary voices that can speak in the dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Planet {
    Sun,
    Mercury,
    Venus,
    Mars,
    Jupiter,
    Saturn,
    Uranus,
    Neptune,
    Pluto,
}

impl Planet {
    pub const ALL: [Planet; 9] = [
        Planet::Sun,
        Planet::Mercury,
        Planet::Venus,
        Planet::Mars,
        Planet::Jupiter,
        Planet::Saturn,
        Planet::Uranus,
        Planet::Neptune,
        Planet::Pluto,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Planet::Sun => "Sun",
            Planet::Mercury => "Mercury",
            Planet::Venus => "Venus",
            Planet::Mars => "Mars",
            Planet::Jupiter => "Jupiter",
            Planet::Saturn => "Saturn",
            Planet::Uranus => "Uranus",
            Planet::Neptune => "Neptune",
            Planet::Pluto => "Pluto",
        }
    }
}

/// Who authored a timeline entry.
///
/// Serialized as a bare string (`"Venus"`, `"Moon"`, `"Story"`, `"system"`,
/// `"user"`) so the timeline stays readable for hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Author {
    Planet(Planet),
    Moon,
    Story,
    System,
    User,
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Author::Planet(p) => f.write_str(p.name()),
            Author::Moon => f.write_str("Moon"),
            Author::Story => f.write_str("Story"),
            Author::System => f.write_str("system"),
            Author::User => f.write_str("user"),
        }
    }
}

impl FromStr for Author {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Moon" => Ok(Author::Moon),
            "Story" => Ok(Author::Story),
            "system" => Ok(Author::System),
            "user" => Ok(Author::User),
            other => Planet::ALL
                .iter()
                .find(|p| p.name() == other)
                .map(|p| Author::Planet(*p))
                .ok_or_else(|| format!("unknown author: {other}")),
        }
    }
}

impl From<Author> for String {
    fn from(a: Author) -> Self {
        a.to_string()
    }
}

impl TryFrom<String> for Author {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Variant payload of a [`ChatMessage`], tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageBody {
    Planet {
        content: String,
    },
    Moon {
        content: String,
    },
    Story {
        content: String,
        #[serde(rename = "arcNumber", default, skip_serializing_if = "Option::is_none")]
        arc_number: Option<u32>,
        #[serde(rename = "stageLabel", default, skip_serializing_if = "Option::is_none")]
        stage_label: Option<String>,
    },
    Finale {
        content: String,
        #[serde(rename = "arcNumber", default, skip_serializing_if = "Option::is_none")]
        arc_number: Option<u32>,
        #[serde(rename = "stageLabel", default, skip_serializing_if = "Option::is_none")]
        stage_label: Option<String>,
    },
    System {
        content: String,
    },
    User {
        content: String,
    },
}

/// A single entry of the chat timeline.
///
/// Messages are immutable once built: fields are only readable, and the
/// constructors keep `author` consistent with the body variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    id: String,
    author: Author,
    time: String,
    #[serde(flatten)]
    body: MessageBody,
}

impl ChatMessage {
    fn build(author: Author, body: MessageBody) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            author,
            time: Local::now().format("%H:%M").to_string(),
            body,
        }
    }

    pub fn planet(planet: Planet, content: impl Into<String>) -> Self {
        Self::build(
            Author::Planet(planet),
            MessageBody::Planet {
                content: content.into(),
            },
        )
    }

    pub fn moon(content: impl Into<String>) -> Self {
        Self::build(
            Author::Moon,
            MessageBody::Moon {
                content: content.into(),
            },
        )
    }

    /// A story beat. `arc_number` values below 1 are stored as 1.
    pub fn story(
        content: impl Into<String>,
        arc_number: Option<u32>,
        stage_label: Option<String>,
    ) -> Self {
        Self::build(
            Author::Story,
            MessageBody::Story {
                content: content.into(),
                arc_number: arc_number.map(|n| n.max(1)),
                stage_label,
            },
        )
    }

    pub fn finale(
        content: impl Into<String>,
        arc_number: Option<u32>,
        stage_label: Option<String>,
    ) -> Self {
        Self::build(
            Author::Story,
            MessageBody::Finale {
                content: content.into(),
                arc_number: arc_number.map(|n| n.max(1)),
                stage_label,
            },
        )
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::build(
            Author::System,
            MessageBody::System {
                content: content.into(),
            },
        )
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::build(
            Author::User,
            MessageBody::User {
                content: content.into(),
            },
        )
    }

    /// Override the display time, e.g. when restoring a saved timeline.
    pub fn at(mut self, time: impl Into<String>) -> Self {
        self.time = time.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn author(&self) -> Author {
        self.author
    }

    pub fn time(&self) -> &str {
        &self.time
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn content(&self) -> &str {
        match &self.body {
            MessageBody::Planet { content }
            | MessageBody::Moon { content }
            | MessageBody::Story { content, .. }
            | MessageBody::Finale { content, .. }
            | MessageBody::System { content }
            | MessageBody::User { content } => content,
        }
    }

    /// Arc number carried by `story`/`finale` messages.
    pub fn arc_number(&self) -> Option<u32> {
        match &self.body {
            MessageBody::Story { arc_number, .. } | MessageBody::Finale { arc_number, .. } => {
                *arc_number
            }
            _ => None,
        }
    }

    pub fn is_moon(&self) -> bool {
        self.author == Author::Moon
    }
}

/// One selectable continuation of the story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStoryOption {
    pub id: String,
    pub title: String,
    pub description: String,
}

/// Story-level metadata established on the first arc and carried forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStoryMeta {
    pub author: String,
    pub title: String,
    pub genre: String,
    pub contract: String,
    pub arc_limit: u32,
}

/// A previously shown story beat and the choice that led away from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSegment {
    pub text: String,
    pub arc: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_description: Option<String>,
}
