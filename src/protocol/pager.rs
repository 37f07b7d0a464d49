//! Paginated list queries
//!
//! Requests go out as `<player?> <verb> <start> <count> <filters...>
//! correlationid:<n>`. Replies come back with the same prefix followed by
//! `key%3Avalue` tokens; records are separated by the result set's
//! delimiter field and the total is carried by its count field.
//!
//! ## Staleness
//!
//! Two watermarks decide whether a reply is still wanted:
//!
//! ```text
//! command watermark  = correlation id of the latest start=0 request for the command
//! item-type watermark = correlation counter at the latest unregister of that type
//! ```
//!
//! A reply whose correlation id is below either watermark is dropped
//! without touching any listener. Replies are never matched to requests
//! by position, only by id, so re-ordered or late pages are harmless.
//!
//! ## Continuation
//!
//! After an accepted page the pager computes the next request itself
//! (`start + itemsPerResponse` while below the clamped total) and replays
//! the filter parameters of the original request.

use std::collections::HashMap;

use tracing::{debug, trace};

use super::codec;
use super::model::{ItemType, Record};
use super::query::{ListQuery, QueryKind, QueryParams, ResultSet};

/// Requests remembered for continuation; older ones are dropped first.
const MAX_PENDING_REQUESTS: usize = 256;

/// Metadata handed to listeners alongside a decoded page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMeta {
    /// Server is rescanning its library
    pub rescan: bool,
    /// Total matches reported by the server
    pub count: usize,
    /// Configured page size
    pub page_max: usize,
    /// Offset of the first item in this page
    pub start: usize,
}

/// Follow-up request computed from an accepted page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextPage {
    pub kind: QueryKind,
    /// Decoded player id for player-scoped queries
    pub player_id: Option<String>,
    pub start: usize,
    pub count: usize,
    pub params: QueryParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Line could not be parsed as a reply to this query
    Malformed(String),
    /// Superseded by a newer request or a cancellation
    Stale { correlation_id: u64 },
    Accepted {
        delivered: usize,
        next: Option<NextPage>,
    },
}

/// Fully tokenized reply, before acceptance.
#[derive(Debug, Default)]
pub struct ParsedReply {
    pub player_id: Option<String>,
    pub start: usize,
    pub items_per_response: usize,
    pub correlation_id: u64,
    pub rescan: bool,
    /// Totals indexed like the descriptor's result sets
    pub counts: Vec<Option<usize>>,
    /// Records indexed like the descriptor's result sets
    pub records: Vec<Vec<Record>>,
    /// Filter parameters the server echoed from the request
    pub echoed: QueryParams,
    /// Non-record fields that are not filters (e.g. status header)
    pub header: Record,
}

/// Parse a reply line for `query`. Tokens are the raw, still-escaped
/// tokens of the whole line.
pub fn parse_reply(query: &ListQuery, tokens: &[&str]) -> Result<ParsedReply, String> {
    let ofs = query.token_offset();
    if tokens.len() < ofs + 2 {
        return Err(format!(
            "expected at least {} tokens for '{}', got {}",
            ofs + 2,
            query.verb,
            tokens.len()
        ));
    }

    let sets = query.result_sets;
    let mut reply = ParsedReply {
        player_id: query.player_scoped.then(|| codec::decode(tokens[0])),
        start: usize::try_from(codec::parse_int_or_zero(tokens[ofs])).unwrap_or(0),
        items_per_response: usize::try_from(codec::parse_int_or_zero(tokens[ofs + 1]))
            .unwrap_or(0),
        counts: vec![None; sets.len()],
        records: vec![Vec::new(); sets.len()],
        ..Default::default()
    };

    // (result set index, record being filled)
    let mut current: Option<(usize, Record)> = None;

    for token in &tokens[ofs + 2..] {
        let Some((key, value)) = codec::split_tagged(token) else {
            return Err(format!("expected tagged token in '{}' reply: {}", query.verb, token));
        };

        if key == "correlationid" {
            reply.correlation_id = u64::try_from(codec::parse_int_or_zero(&value)).unwrap_or(0);
        } else if key == "rescan" {
            reply.rescan = value == "1";
        } else if let Some(idx) = sets.iter().position(|s| s.count_field == key) {
            reply.counts[idx] = Some(usize::try_from(codec::parse_int_or_zero(&value)).unwrap_or(0));
        } else if let Some(idx) = sets.iter().position(|s| s.is_delimiter(&key)) {
            // A record may open with any of its delimiters; the next record
            // starts once a delimiter repeats or another set begins.
            match current.as_mut() {
                Some((set, record)) if *set == idx && !record.contains_key(&key) => {
                    record.insert(key, value);
                }
                _ => {
                    if let Some((set, record)) = current.take() {
                        reply.records[set].push(record);
                    }
                    let mut record = Record::new();
                    record.insert(key, value);
                    current = Some((idx, record));
                }
            }
        } else if let Some((_, record)) = current.as_mut() {
            record.insert(key, value);
        } else if query.accepts_param(&key) {
            reply.echoed.set(key, value);
        } else {
            reply.header.insert(key, value);
        }
    }

    if let Some((set, record)) = current.take() {
        reply.records[set].push(record);
    }

    Ok(reply)
}

#[derive(Debug)]
struct PendingRequest {
    kind: QueryKind,
    params: QueryParams,
}

/// Watermarks and in-flight request bookkeeping.
#[derive(Debug)]
pub struct Pager {
    page_size: usize,
    max_list_size: usize,
    command_marks: HashMap<QueryKind, u64>,
    type_marks: HashMap<ItemType, u64>,
    pending: HashMap<u64, PendingRequest>,
}

impl Pager {
    pub fn new(page_size: usize, max_list_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            max_list_size,
            command_marks: HashMap::new(),
            type_marks: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Record a request that is being sent with `correlation_id`.
    pub fn begin_request(
        &mut self,
        kind: QueryKind,
        start: usize,
        params: QueryParams,
        correlation_id: u64,
    ) {
        if start == 0 {
            trace!("{}: watermark -> {}", kind, correlation_id);
            self.command_marks.insert(kind, correlation_id);
            self.pending
                .retain(|id, p| p.kind != kind || *id >= correlation_id);
        }

        if self.pending.len() >= MAX_PENDING_REQUESTS {
            if let Some(oldest) = self.pending.keys().min().copied() {
                self.pending.remove(&oldest);
            }
        }
        self.pending
            .insert(correlation_id, PendingRequest { kind, params });
    }

    /// Invalidate every in-flight reply for `item_type`. `next_id` is the
    /// correlation id the dispatcher will hand out next.
    pub fn cancel(&mut self, item_type: ItemType, next_id: u64) {
        debug!("{}: cancelled, watermark -> {}", item_type, next_id);
        self.type_marks.insert(item_type, next_id);
    }

    /// Forget in-flight requests (their replies can no longer arrive).
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    pub fn command_watermark(&self, kind: QueryKind) -> u64 {
        self.command_marks.get(&kind).copied().unwrap_or(0)
    }

    pub fn type_watermark(&self, item_type: ItemType) -> u64 {
        self.type_marks.get(&item_type).copied().unwrap_or(0)
    }

    /// Parse, check and deliver one reply.
    ///
    /// `deliver` receives each accepted result set with its records and
    /// returns whether a listener took the page. Sets that were not taken
    /// do not ask for further pages.
    pub fn handle_reply<F>(&mut self, query: &ListQuery, tokens: &[&str], mut deliver: F) -> ReplyOutcome
    where
        F: FnMut(&ResultSet, PageMeta, Vec<Record>) -> bool,
    {
        let reply = match parse_reply(query, tokens) {
            Ok(reply) => reply,
            Err(e) => return ReplyOutcome::Malformed(e),
        };

        let cid = reply.correlation_id;
        let pending = self.pending.remove(&cid).filter(|p| p.kind == query.kind);

        if cid < self.command_watermark(query.kind) {
            trace!(
                "{}: dropping stale reply {} (watermark {})",
                query.verb,
                cid,
                self.command_watermark(query.kind)
            );
            return ReplyOutcome::Stale { correlation_id: cid };
        }

        let sets = query.result_sets;
        let any_count = reply.counts.iter().any(Option::is_some);
        let mut delivered = 0;
        let mut any_fresh = false;
        let mut total = 0usize;

        for (idx, (set, records)) in sets.iter().zip(reply.records).enumerate() {
            // Multiplexed replies only carry the sets that matched. The first
            // page reports zero to the sets that are absent; later pages
            // leave them alone.
            if sets.len() > 1 && any_count && reply.counts[idx].is_none() && reply.start > 0 {
                continue;
            }
            if cid < self.type_watermark(set.item_type) {
                trace!("{}: {} listener cancelled, skipping set", query.verb, set.item_type);
                continue;
            }
            any_fresh = true;

            let count = reply.counts[idx].unwrap_or(0);
            let meta = PageMeta {
                rescan: reply.rescan,
                count,
                page_max: self.page_size,
                start: reply.start,
            };
            if deliver(set, meta, records) {
                delivered += 1;
                total = total.max(count.min(self.max_list_size));
            }
        }

        if !any_fresh {
            return ReplyOutcome::Stale { correlation_id: cid };
        }

        let end = reply.start + reply.items_per_response;
        let next = (reply.items_per_response > 0 && end < total).then(|| {
            let mut params = pending.map(|p| p.params).unwrap_or_default();
            params.merge(reply.echoed);
            NextPage {
                kind: query.kind,
                player_id: reply.player_id,
                start: end,
                count: (total - end).min(self.page_size),
                params,
            }
        });

        ReplyOutcome::Accepted { delivered, next }
    }
}
