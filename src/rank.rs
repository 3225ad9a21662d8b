use crate::calc::{cmp_desc, ScoreEntry};
use crate::error::ServiceResult;
use crate::store;
use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

/// Competition ranks, highest value first. Tied values share a rank and the
/// next distinct value skips past the tie: `[95, 95, 90, 80]` -> `[1, 1, 3, 4]`.
/// Absent and unscored entries get `None`. The output is index-aligned with
/// the input.
pub fn competition_ranks(entries: &[ScoreEntry]) -> Vec<Option<i64>> {
    let mut ranks = vec![None; entries.len()];

    let mut rankable: Vec<(usize, f64)> = entries
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            ScoreEntry::Submitted(v) => Some((i, *v)),
            ScoreEntry::Absent | ScoreEntry::Unscored => None,
        })
        .collect();
    rankable.sort_by(|a, b| cmp_desc(a.1, b.1));

    let mut current_rank = 0_i64;
    let mut previous: Option<f64> = None;
    for (position, (idx, value)) in rankable.into_iter().enumerate() {
        if previous != Some(value) {
            current_rank = position as i64 + 1;
            previous = Some(value);
        }
        ranks[idx] = Some(current_rank);
    }
    ranks
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankOutcome {
    pub exam_id: String,
    pub ranked_count: usize,
    pub unranked_count: usize,
}

/// Recompute and store every rank of one exam. Runs on whatever connection or
/// transaction it is handed; see [`compute_ranks`] for the standalone entry.
pub fn rerank_exam(conn: &Connection, exam_id: &str) -> ServiceResult<RankOutcome> {
    let mut scores = store::find_scores_by_exam(conn, exam_id)?;
    let entries: Vec<ScoreEntry> = scores.iter().map(ScoreEntry::from).collect();
    let ranks = competition_ranks(&entries);

    let mut ranked_count = 0_usize;
    for (score, rank) in scores.iter_mut().zip(ranks) {
        if rank.is_some() {
            ranked_count += 1;
        }
        score.rank = rank;
    }
    let unranked_count = scores.len() - ranked_count;
    store::save_scores(conn, &scores)?;

    debug!(exam_id, ranked_count, unranked_count, "ranks recalculated");
    Ok(RankOutcome {
        exam_id: exam_id.to_string(),
        ranked_count,
        unranked_count,
    })
}

/// Read-then-batch-write inside a single transaction. Safe to call repeatedly.
pub fn compute_ranks(conn: &Connection, exam_id: &str) -> ServiceResult<RankOutcome> {
    let tx = conn.unchecked_transaction()?;
    let outcome = rerank_exam(&tx, exam_id)?;
    tx.commit()?;
    Ok(outcome)
}
