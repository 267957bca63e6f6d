//! Shared record types for unit tests.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::schema::{Record, Schema};

pub const INSTANCE: &str = "instance";

#[derive(Clone, PartialEq, prost::Message)]
pub struct HealthCheck {
    #[prost(string, tag = "1")]
    pub kind: String,
    #[prost(uint32, tag = "2")]
    pub ttl_secs: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Instance {
    pub id: String,
    pub host: String,
    pub port: u32,
    pub weight: u16,
    pub priority: i8,
    pub revision: i64,
    pub healthy: bool,
    pub valid: bool,
    pub modify_time: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
    pub health_check: Option<HealthCheck>,
}

impl Record for Instance {
    fn schema() -> Schema<Self> {
        Schema::<Self>::new()
            .string("ID", |r| &r.id, |r, v| r.id = v)
            .string("Host", |r| &r.host, |r, v| r.host = v)
            .u32("Port", |r| r.port, |r, v| r.port = v)
            .u16("Weight", |r| r.weight, |r, v| r.weight = v)
            .i8("Priority", |r| r.priority, |r, v| r.priority = v)
            .i64("Revision", |r| r.revision, |r, v| r.revision = v)
            .bool("Healthy", |r| r.healthy, |r, v| r.healthy = v)
            .bool("Valid", |r| r.valid, |r, v| r.valid = v)
            .timestamp("ModifyTime", |r| r.modify_time, |r, v| r.modify_time = v)
            .map("Metadata", |r| &r.metadata, |r, v| r.metadata = v)
            .message("HealthCheck", |r| r.health_check.as_ref(), |r, v| r.health_check = v)
    }
}

impl Instance {
    pub fn sample(id: &str) -> Self {
        Self {
            id: id.to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            weight: 100,
            priority: -1,
            revision: 7,
            healthy: true,
            valid: true,
            modify_time: DateTime::from_timestamp(1_700_000_000, 42).unwrap(),
            metadata: HashMap::from([("zone".to_string(), "az-1".to_string())]),
            health_check: None,
        }
    }
}

/// A record type whose schema writes nothing.
#[derive(Debug, Default, PartialEq)]
pub struct Empty;

impl Record for Empty {
    fn schema() -> Schema<Self> {
        Schema::<Self>::new()
    }
}
