//! Attaches records and secondary attributes to a final ID sequence.
//!
//! Every lookup is batched over the whole sequence, one round trip per attribute
//! category. Members whose core record has vanished since the ID search are dropped
//! from the sequence rather than padded.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::extension::Extensions;
use crate::query::QuerySpec;
use crate::settings::Settings;
use crate::store::{ActivityStore, EntityStore, IdMap, MemberRecord, MetaStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetaMatch {
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SecondaryAttributes {
    /// Empty when the member has never been active.
    pub last_activity: String,
    pub total_friend_count: u64,
    /// Only filled in when the query asked for it.
    pub latest_update: Option<String>,
    pub meta: Option<MetaMatch>,
    /// Values from registered attribute fetchers, by fetcher name.
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSet {
    pub ids: Vec<u64>,
    pub members: Vec<MemberRecord>,
    pub total: u64,
    #[serde(serialize_with = "ordered_attributes")]
    pub attributes: IdMap<SecondaryAttributes>,
}

impl ResultSet {
    pub fn empty() -> Self {
        Self {
            ids: Vec::new(),
            members: Vec::new(),
            total: 0,
            attributes: IdMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn attributes_of(&self, id: u64) -> Option<&SecondaryAttributes> {
        self.attributes.get(&id)
    }

    pub fn display_names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.display_name.as_str()).collect()
    }
}

// serialized with sorted keys so equal results encode identically
fn ordered_attributes<S: serde::Serializer>(
    attributes: &IdMap<SecondaryAttributes>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let ordered: BTreeMap<_, _> = attributes.iter().collect();
    ordered.serialize(serializer)
}

pub struct Hydrator<'a, S: EntityStore + MetaStore + ActivityStore + ?Sized> {
    store: &'a S,
    settings: &'a Settings,
}

impl<'a, S: EntityStore + MetaStore + ActivityStore + ?Sized> Hydrator<'a, S> {
    pub fn new(store: &'a S, settings: &'a Settings) -> Self {
        Self { store, settings }
    }

    /// Hydrates `ids` in order. `total` falls back to the number of hydrated members.
    pub fn hydrate(
        &self,
        ids: &[u64],
        total: Option<u64>,
        spec: &QuerySpec,
        extensions: &Extensions,
    ) -> Result<ResultSet> {
        let mut records: IdMap<MemberRecord> = self
            .store
            .fetch_members(ids)?
            .into_iter()
            .map(|record| (record.id, record))
            .collect();
        let members: Vec<MemberRecord> = ids.iter().filter_map(|id| records.remove(id)).collect();
        let ids: Vec<u64> = members.iter().map(|m| m.id).collect();
        let total = total.unwrap_or(members.len() as u64);

        let mut attributes: IdMap<SecondaryAttributes> = IdMap::default();
        if !ids.is_empty() && spec.populates_extras() {
            self.populate(&ids, spec, &mut attributes)?;
            for fetcher in extensions.fetchers() {
                let values = fetcher.fetch(&ids)?;
                debug!(fetcher = fetcher.name(), values = values.len(), "attribute fetcher ran");
                for id in &ids {
                    if let Some(value) = values.get(id) {
                        attributes
                            .entry(*id)
                            .or_default()
                            .extra
                            .insert(fetcher.name().to_string(), value.clone());
                    }
                }
            }
        }
        debug!(hydrated = ids.len(), total, "hydration complete");
        Ok(ResultSet {
            ids,
            members,
            total,
            attributes,
        })
    }

    fn populate(&self, ids: &[u64], spec: &QuerySpec, attributes: &mut IdMap<SecondaryAttributes>) -> Result<()> {
        let mut last_activity = self.store.last_activity(ids)?;
        for id in ids {
            attributes.insert(
                *id,
                SecondaryAttributes {
                    last_activity: last_activity.remove(id).unwrap_or_default(),
                    ..Default::default()
                },
            );
        }

        let mut keys = vec![self.settings.friend_count_key.as_str()];
        if spec.latest_update {
            keys.push(self.settings.latest_update_key.as_str());
        }
        for row in self.store.meta_for(ids, &keys)? {
            let Some(entry) = attributes.get_mut(&row.user_id) else {
                continue;
            };
            if row.key == self.settings.friend_count_key {
                entry.total_friend_count = row.value.trim().parse().unwrap_or(0);
            } else {
                entry.latest_update = Some(row.value);
            }
        }
        if spec.latest_update {
            for entry in attributes.values_mut() {
                entry.latest_update.get_or_insert_with(String::new);
            }
        }

        if let Some(filter) = &spec.meta {
            for row in self.store.meta_for(ids, &[filter.key.as_str()])? {
                let matches = filter.value.as_ref().is_none_or(|wanted| *wanted == row.value);
                if let Some(entry) = attributes.get_mut(&row.user_id) {
                    if matches && entry.meta.is_none() {
                        entry.meta = Some(MetaMatch {
                            key: row.key,
                            value: Some(row.value),
                        });
                    }
                }
            }
            for entry in attributes.values_mut() {
                entry.meta.get_or_insert_with(|| MetaMatch {
                    key: filter.key.clone(),
                    value: None,
                });
            }
        }
        Ok(())
    }
}
