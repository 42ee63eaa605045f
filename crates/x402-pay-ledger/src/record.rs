use std::collections::BTreeMap;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// One committed payment. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: u64,
    pub agent: Address,
    pub data_source: String,
    #[serde(with = "amount_string")]
    pub amount: u128,
    pub data_hash: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub query_type: String,
}

/// A payment about to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub agent: Address,
    pub data_source: String,
    pub amount: u128,
    pub data_hash: String,
    pub query_type: String,
}

impl NewPayment {
    pub fn new(
        agent: Address,
        data_source: impl Into<String>,
        amount: u128,
        data_hash: impl Into<String>,
        query_type: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            data_source: data_source.into(),
            amount,
            data_hash: data_hash.into(),
            query_type: query_type.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), LedgerError> {
        if self.amount == 0 {
            return Err(LedgerError::InvalidPayment("amount must be positive".to_string()));
        }
        if self.data_source.is_empty() {
            return Err(LedgerError::InvalidPayment("data source must not be empty".to_string()));
        }
        Ok(())
    }

    pub(crate) fn into_record(self, id: u64, timestamp: i64) -> PaymentRecord {
        PaymentRecord {
            id,
            agent: self.agent,
            data_source: self.data_source,
            amount: self.amount,
            data_hash: self.data_hash,
            timestamp,
            query_type: self.query_type,
        }
    }
}

/// Running totals for one agent, updated exactly once per committed record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAggregates {
    #[serde(with = "amount_string")]
    pub total_spent: u128,
    pub payment_count: u64,
    #[serde(with = "amount_string::map")]
    pub spent_by_source: BTreeMap<String, u128>,
}

impl AgentAggregates {
    pub(crate) fn apply(&mut self, record: &PaymentRecord) {
        self.total_spent = self.total_spent.saturating_add(record.amount);
        self.payment_count += 1;
        let by_source = self
            .spent_by_source
            .entry(record.data_source.clone())
            .or_insert(0);
        *by_source = by_source.saturating_add(record.amount);
    }
}

/// `(totalSpent, count, first, last)` for one agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStats {
    #[serde(with = "amount_string")]
    pub total_spent: u128,
    pub payment_count: u64,
    pub first_payment: Option<i64>,
    pub last_payment: Option<i64>,
}

/// An agent's history plus its aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLedger {
    pub records: Vec<PaymentRecord>,
    pub aggregates: AgentAggregates,
}

/// Which tier served a read or accepted a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Authoritative,
    Fallback,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Authoritative => "authoritative",
            Tier::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReceipt {
    pub success: bool,
    /// False when the record went to the in-memory fallback.
    pub authoritative: bool,
    pub record: PaymentRecord,
}

/// Serde helpers: `u128` amounts travel as decimal strings so JSON
/// consumers never lose precision.
pub(crate) mod amount_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        let s = String::deserialize(d)?;
        s.parse::<u128>().map_err(de::Error::custom)
    }

    pub mod map {
        use std::collections::BTreeMap;

        use serde::ser::SerializeMap;
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &BTreeMap<String, u128>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            let mut map = s.serialize_map(Some(value.len()))?;
            for (k, v) in value {
                map.serialize_entry(k, &v.to_string())?;
            }
            map.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<BTreeMap<String, u128>, D::Error> {
            BTreeMap::<String, String>::deserialize(d)?
                .into_iter()
                .map(|(k, v)| v.parse::<u128>().map(|n| (k, n)).map_err(de::Error::custom))
                .collect()
        }
    }
}
