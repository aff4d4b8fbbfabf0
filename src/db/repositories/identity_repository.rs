use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script};
use std::collections::HashMap;

use crate::db::store::{redis_key, CountingStore, StoreError};
#[cfg(test)]
use crate::db::store::unavailable;
use crate::models::identity::{IdentityRecord, IdentitySource};
use crate::models::plan::Plan;

// Creates the hash only when the key does not exist yet.
const CREATE_IF_ABSENT_SCRIPT: &str = r#"
    if redis.call('EXISTS', KEYS[1]) == 1 then
        return 0
    end
    redis.call('HSET', KEYS[1], unpack(ARGV))
    return 1
"#;

// Sets a single field on an existing hash; never creates a partial record.
const UPDATE_IF_PRESENT_SCRIPT: &str = r#"
    if redis.call('EXISTS', KEYS[1]) == 0 then
        return 0
    end
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
    return 1
"#;

const TOUCH_USAGE_SCRIPT: &str = r#"
    if redis.call('EXISTS', KEYS[1]) == 0 then
        return 0
    end
    redis.call('HINCRBY', KEYS[1], 'requests', 1)
    redis.call('HSET', KEYS[1], 'last_used', ARGV[1])
    return 1
"#;

/// Identity records keyed by `identity_key`.
#[derive(Clone)]
pub struct IdentityRepository {
    store: CountingStore,
}

impl IdentityRepository {
    pub fn new(store: CountingStore) -> Self {
        Self { store }
    }

    pub async fn find(&self, identity_key: &str) -> Result<Option<IdentityRecord>, StoreError> {
        match &self.store {
            CountingStore::Memory(memory) => {
                Ok(memory.identities.get(identity_key).map(|r| r.value().clone()))
            }
            CountingStore::Redis { connection_manager, key_prefix } => {
                let mut conn = connection_manager.as_ref().clone();
                let key = redis_key(key_prefix, "identity", identity_key);
                let fields: HashMap<String, String> = conn.hgetall(&key).await?;
                if fields.is_empty() {
                    return Ok(None);
                }
                record_from_fields(identity_key, &fields).map(Some)
            }
            #[cfg(test)]
            CountingStore::Unavailable => Err(unavailable()),
        }
    }

    /// Stores `record` unless a record with the same key already exists.
    /// Returns the record that is stored afterwards and whether this call
    /// created it. A losing racer gets the winner's record back untouched.
    pub async fn create_if_absent(
        &self,
        record: &IdentityRecord,
    ) -> Result<(IdentityRecord, bool), StoreError> {
        match &self.store {
            CountingStore::Memory(memory) => {
                let mut created = false;
                let stored = memory
                    .identities
                    .entry(record.identity_key.clone())
                    .or_insert_with(|| {
                        created = true;
                        record.clone()
                    })
                    .value()
                    .clone();
                Ok((stored, created))
            }
            CountingStore::Redis { connection_manager, key_prefix } => {
                let mut conn = connection_manager.as_ref().clone();
                let key = redis_key(key_prefix, "identity", &record.identity_key);

                let script = Script::new(CREATE_IF_ABSENT_SCRIPT);
                let mut invocation = script.prepare_invoke();
                invocation.key(&key);
                for (field, value) in record_to_fields(record) {
                    invocation.arg(field).arg(value);
                }
                let created: i32 = invocation.invoke_async(&mut conn).await?;

                if created == 1 {
                    return Ok((record.clone(), true));
                }

                let fields: HashMap<String, String> = conn.hgetall(&key).await?;
                let existing = record_from_fields(&record.identity_key, &fields)?;
                Ok((existing, false))
            }
            #[cfg(test)]
            CountingStore::Unavailable => Err(unavailable()),
        }
    }

    /// Returns false when no record exists for the key.
    pub async fn set_active(&self, identity_key: &str, active: bool) -> Result<bool, StoreError> {
        match &self.store {
            CountingStore::Memory(memory) => match memory.identities.get_mut(identity_key) {
                Some(mut record) => {
                    record.active = active;
                    Ok(true)
                }
                None => Ok(false),
            },
            CountingStore::Redis { .. } => {
                self.update_field(identity_key, "active", if active { "true" } else { "false" })
                    .await
            }
            #[cfg(test)]
            CountingStore::Unavailable => Err(unavailable()),
        }
    }

    /// Explicit plan change. Returns false when no record exists for the key.
    pub async fn set_plan(&self, identity_key: &str, plan: Plan) -> Result<bool, StoreError> {
        match &self.store {
            CountingStore::Memory(memory) => match memory.identities.get_mut(identity_key) {
                Some(mut record) => {
                    record.plan = plan;
                    Ok(true)
                }
                None => Ok(false),
            },
            CountingStore::Redis { .. } => {
                self.update_field(identity_key, "plan", plan.as_str()).await
            }
            #[cfg(test)]
            CountingStore::Unavailable => Err(unavailable()),
        }
    }

    /// Bumps the lifetime request counter and last-used timestamp.
    pub async fn touch_usage(&self, identity_key: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        match &self.store {
            CountingStore::Memory(memory) => {
                if let Some(mut record) = memory.identities.get_mut(identity_key) {
                    record.total_requests += 1;
                    record.last_used_at = Some(now);
                }
                Ok(())
            }
            CountingStore::Redis { connection_manager, key_prefix } => {
                let mut conn = connection_manager.as_ref().clone();
                let key = redis_key(key_prefix, "identity", identity_key);
                let _: i32 = Script::new(TOUCH_USAGE_SCRIPT)
                    .key(&key)
                    .arg(now.to_rfc3339())
                    .invoke_async(&mut conn)
                    .await?;
                Ok(())
            }
            #[cfg(test)]
            CountingStore::Unavailable => Err(unavailable()),
        }
    }

    async fn update_field(&self, identity_key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let CountingStore::Redis { connection_manager, key_prefix } = &self.store else {
            return Ok(false);
        };
        let mut conn = connection_manager.as_ref().clone();
        let key = redis_key(key_prefix, "identity", identity_key);
        let updated: i32 = Script::new(UPDATE_IF_PRESENT_SCRIPT)
            .key(&key)
            .arg(field)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }
}

fn record_to_fields(record: &IdentityRecord) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("plan", record.plan.as_str().to_string()),
        ("created", record.created_at.to_rfc3339()),
        ("active", record.active.to_string()),
        ("source", record.source.as_str().to_string()),
        ("requests", record.total_requests.to_string()),
    ];
    if let Some(email) = &record.email {
        fields.push(("email", email.clone()));
    }
    if let Some(user) = &record.marketplace_user {
        fields.push(("rapidapi_user", user.clone()));
    }
    if let Some(last_used) = &record.last_used_at {
        fields.push(("last_used", last_used.to_rfc3339()));
    }
    fields
}

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("{} is not RFC 3339: {}", field, e)))
}

fn record_from_fields(
    identity_key: &str,
    fields: &HashMap<String, String>,
) -> Result<IdentityRecord, StoreError> {
    let required = |name: &str| {
        fields
            .get(name)
            .ok_or_else(|| StoreError::Corrupt(format!("{} missing field '{}'", identity_key, name)))
    };

    let plan = required("plan")?
        .parse::<Plan>()
        .map_err(StoreError::Corrupt)?;
    let created_at = parse_timestamp("created", required("created")?)?;
    let active = required("active")? == "true";
    let source = match fields.get("source") {
        Some(source) => source.parse::<IdentitySource>().map_err(StoreError::Corrupt)?,
        None => IdentitySource::Direct,
    };
    let total_requests = fields
        .get("requests")
        .map(|v| v.parse::<u64>())
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("requests is not a number: {}", e)))?
        .unwrap_or(0);
    let last_used_at = fields
        .get("last_used")
        .map(|v| parse_timestamp("last_used", v))
        .transpose()?;

    Ok(IdentityRecord {
        identity_key: identity_key.to_string(),
        plan,
        created_at,
        active,
        source,
        email: fields.get("email").cloned(),
        marketplace_user: fields.get("rapidapi_user").cloned(),
        total_requests,
        last_used_at,
    })
}
