//! In-memory collection catalog and `config.queryAnalyzers`.

use ddl_race_types::{CollectionUuid, Namespace, QueryAnalyzerDoc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// A collection and its documents, in insertion (record id) order.
#[derive(Debug, Clone)]
pub(crate) struct SimCollection {
    pub uuid: CollectionUuid,
    pub docs: Vec<Value>,
}

impl SimCollection {
    fn new() -> Self {
        Self {
            uuid: CollectionUuid::new(),
            docs: Vec::new(),
        }
    }
}

/// Catalog mutations that can be rejected by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CatalogError {
    NamespaceNotFound,
    NamespaceExists,
}

/// Everything the simulated deployment persists.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    collections: HashMap<Namespace, SimCollection>,
    query_analyzers: BTreeMap<Namespace, QueryAnalyzerDoc>,
}

impl Catalog {
    pub fn get(&self, ns: &Namespace) -> Option<&SimCollection> {
        self.collections.get(ns)
    }

    pub fn uuid_of(&self, ns: &Namespace) -> Option<CollectionUuid> {
        self.collections.get(ns).map(|c| c.uuid)
    }

    pub fn create(&mut self, ns: &Namespace) -> Result<CollectionUuid, CatalogError> {
        if self.collections.contains_key(ns) {
            return Err(CatalogError::NamespaceExists);
        }
        let coll = SimCollection::new();
        let uuid = coll.uuid;
        self.collections.insert(ns.clone(), coll);
        Ok(uuid)
    }

    /// Insert documents, implicitly creating the collection.
    pub fn insert(&mut self, ns: &Namespace, docs: Vec<Value>) -> u64 {
        let coll = self
            .collections
            .entry(ns.clone())
            .or_insert_with(SimCollection::new);
        let n = docs.len() as u64;
        coll.docs.extend(docs);
        n
    }

    /// Drop a collection; returns whether it existed.
    pub fn drop_collection(&mut self, ns: &Namespace) -> bool {
        self.collections.remove(ns).is_some()
    }

    /// Move a collection to a new name, keeping its identity.
    pub fn rename(&mut self, from: &Namespace, to: &Namespace) -> Result<(), CatalogError> {
        if self.collections.contains_key(to) {
            return Err(CatalogError::NamespaceExists);
        }
        let coll = self
            .collections
            .remove(from)
            .ok_or(CatalogError::NamespaceNotFound)?;
        self.collections.insert(to.clone(), coll);
        Ok(())
    }

    /// Remove every document; returns the number removed.
    pub fn delete_all(&mut self, ns: &Namespace) -> u64 {
        match self.collections.get_mut(ns) {
            Some(coll) => {
                let n = coll.docs.len() as u64;
                coll.docs.clear();
                n
            }
            None => 0,
        }
    }

    pub fn query_analyzer(&self, ns: &Namespace) -> Option<&QueryAnalyzerDoc> {
        self.query_analyzers.get(ns)
    }

    pub fn upsert_query_analyzer(&mut self, doc: QueryAnalyzerDoc) -> Option<QueryAnalyzerDoc> {
        self.query_analyzers.insert(doc.ns.clone(), doc)
    }

    pub fn remove_query_analyzer(&mut self, ns: &Namespace) -> Option<QueryAnalyzerDoc> {
        self.query_analyzers.remove(ns)
    }
}
