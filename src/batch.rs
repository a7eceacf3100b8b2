//! Folding of concurrent metadata GETs into multi-get requests.
//!
//! Eligible requests are leaf GETs without a payload whose URI names a single
//! track, artist or album by hex id. They are grouped by resource type and
//! query string; every group with more than one member becomes a parent
//! `GET hm://metadata/<type>s[?query]` carrying the members as children.

use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;
use tracing::debug;

use crate::{
    hermes::HermesMethod,
    metrics,
    request::{HermesCall, HermesLeaf, Sequencer},
};

static METADATA_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^hm://metadata/(track|artist|album)/[0-9a-f]+(?:\?(.+))?$")
        .expect("regex to match single track, artist or album metadata URIs")
});

/// Group identity of an eligible request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct BatchKey {
    kind: String,
    query: Option<String>,
}

impl BatchKey {
    fn parent_uri(&self) -> String {
        match &self.query {
            Some(query) => format!("hm://metadata/{}s?{query}", self.kind),
            None => format!("hm://metadata/{}s", self.kind),
        }
    }
}

/// A queued entry the batcher may see.
pub(crate) trait Batchable {
    /// The Hermes leaf, if this entry is one.
    fn as_leaf(&self) -> Option<&HermesLeaf>;

    /// Consume the entry, returning the leaf it holds.
    fn into_leaf(self) -> Option<HermesLeaf>;

    /// Wrap a merged call back into an entry.
    fn from_call(call: HermesCall) -> Self;
}

fn batch_key(leaf: &HermesLeaf) -> Option<BatchKey> {
    if leaf.request.method != HermesMethod::Get || leaf.request.has_payload() {
        return None;
    }
    let captures = METADATA_URI.captures(&leaf.request.uri)?;
    Some(BatchKey {
        kind: captures.get(1)?.as_str().to_owned(),
        query: captures.get(2).map(|m| m.as_str().to_owned()),
    })
}

/// Merge eligible GETs in `queue`.
///
/// Each parent takes the queue position of its first child. Groups larger
/// than `max_children` are split into consecutive chunks; a chunk of one stays
/// a plain request. Everything else keeps its relative order.
pub(crate) fn merge_multi_gets<E: Batchable>(
    queue: Vec<E>,
    max_children: usize,
    sequencer: &Sequencer,
) -> Vec<E> {
    let keys: Vec<Option<BatchKey>> = queue
        .iter()
        .map(|entry| entry.as_leaf().and_then(batch_key))
        .collect();

    let mut groups: HashMap<&BatchKey, Vec<usize>> = HashMap::new();
    for (index, key) in keys.iter().enumerate() {
        if let Some(key) = key {
            groups.entry(key).or_default().push(index);
        }
    }

    let mut chunks: HashMap<usize, Vec<usize>> = HashMap::new();
    for members in groups.values() {
        for chunk in members.chunks(max_children.max(1)) {
            if chunk.len() > 1 {
                chunks.insert(chunk[0], chunk.to_vec());
            }
        }
    }
    if chunks.is_empty() {
        return queue;
    }

    let mut slots: Vec<Option<E>> = queue.into_iter().map(Some).collect();
    let mut merged = Vec::with_capacity(slots.len());
    for index in 0..slots.len() {
        if let (Some(members), Some(key)) = (chunks.remove(&index), keys[index].as_ref()) {
            let children: Vec<HermesLeaf> = members
                .iter()
                .filter_map(|&member| slots[member].take().and_then(Batchable::into_leaf))
                .collect();
            let uri = key.parent_uri();
            debug!(uri = %uri, children = children.len(), "merged multi-get");
            metrics::inc_merged_children(children.len());
            merged.push(E::from_call(HermesCall::MultiGet {
                id: sequencer.next_id(),
                uri,
                children,
            }));
        } else if let Some(entry) = slots[index].take() {
            merged.push(entry);
        }
    }
    merged
}
