//! Newline-delimited JSON request/response shapes for Job Centre.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum Request {
    Put {
        queue: String,
        pri: i64,
        job: Value,
    },
    Get {
        queues: Vec<String>,
        #[serde(default)]
        wait: bool,
    },
    Delete {
        id: u64,
    },
    Abort {
        id: u64,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        job: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pri: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        queue: Option<String>,
    },
    #[serde(rename = "no-job")]
    NoJob,
    #[serde(rename = "error")]
    Error { error: String },
}

impl Response {
    pub fn put_ok(id: u64) -> Self {
        Self::Ok {
            id: Some(id),
            job: None,
            pri: None,
            queue: None,
        }
    }

    pub fn get_ok(id: u64, job: Value, pri: i64, queue: String) -> Self {
        Self::Ok {
            id: Some(id),
            job: Some(job),
            pri: Some(pri),
            queue: Some(queue),
        }
    }

    pub fn plain_ok() -> Self {
        Self::Ok {
            id: None,
            job: None,
            pri: None,
            queue: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error { error: msg.into() }
    }
}
