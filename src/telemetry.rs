//! Prometheus recorder and the domain counters the handlers emit.

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::reputation::VoteTarget;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the global recorder once; later calls return the same handle.
pub fn install() -> Option<&'static PrometheusHandle> {
    HANDLE
        .get_or_try_init(|| PrometheusBuilder::new().install_recorder())
        .map_err(|e| tracing::warn!("prometheus recorder not installed: {e}"))
        .ok()
}

/// Text exposition, `None` when no recorder was installed.
pub fn render() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

pub fn vote_cast(target: VoteTarget, reputation_delta: i64) {
    counter!("agora_votes_cast_total", "target" => target.kind()).increment(1);
    if reputation_delta != 0 {
        counter!("agora_reputation_moved_total").increment(reputation_delta.unsigned_abs());
    }
}

pub fn vote_retracted(target: VoteTarget) {
    counter!("agora_votes_retracted_total", "target" => target.kind()).increment(1);
}

pub fn reward_purchased(cost: i64) {
    counter!("agora_reward_purchases_total").increment(1);
    counter!("agora_reputation_spent_total").increment(cost.max(0) as u64);
}

pub fn purchase_rejected(reason: &'static str) {
    counter!("agora_reward_purchases_rejected_total", "reason" => reason).increment(1);
}
