//! The dual-surface engine (`spec.md` §4.6): owns every per-expiry
//! `Surface`, applies trades, rebuilds the inventory-deformed PC smile, and
//! emits two-sided quotes. A single exclusive-mutation discipline applies
//! (`spec.md` §5): `update_cc`/`on_trade`/`retire_expiry`/`rescore_from_market`
//! mutate and bump `version`; `get_quote`/`get_inventory_summary` only
//! observe.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::CoreContext;
use crate::error::{Error, Result};
use crate::inventory::{
    apply_inventory_deformation, bump_variance, Bump, BucketEdgeParams, BucketInventory, DeltaBucket, MetricDelta,
};
use crate::pricing::price_and_greeks;
use crate::svi::{from_metrics, svi_iv, svi_w, to_metrics, validate, FromMetricsOptions, LogMoneyness, SVIParams, TraderMetrics};

const METRIC_BUMP_EPS: f64 = 1e-4;

/// Absolute put-delta for a priced leg, regardless of which option type it
/// was priced as (`spec.md` GLOSSARY defines delta buckets by absolute
/// put-delta, not call-delta). Put-call parity gives `Δ_put = Δ_call - df`
/// for the same `(F,K,T,σ)`; when `delta` is already a put delta this is
/// the identity.
fn put_delta_abs(delta: f64, is_call: bool, df: f64) -> f64 {
    if is_call {
        (delta - df).abs()
    } else {
        delta.abs()
    }
}

/// Per-strike trading state for one `Surface`. `pc_anchor` is the last
/// observed trade premium at this strike (quoted units); `position` is the
/// maker's net position (`spec.md` §4.6: "customer-buy is size>0, so the
/// maker is short by size").
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeState {
    pub strike: f64,
    pub pc_anchor: f64,
    pub width_ref: f64,
    pub position: f64,
    pub last_bucket: DeltaBucket,
    pub last_trade_time: f64,
}

/// One expiry slice: the Core Curve and the Gaussian bumps that deform it
/// into the quoted Price Curve near the strikes inventory is concentrated
/// at (`spec.md` §4.6/§4.7: `iv_PC` adds `ΣαᵢN(k;kᵢ,λᵢ²)` to `w_cc`).
#[derive(Debug, Clone)]
pub struct Surface {
    pub t: f64,
    pub cc: SVIParams,
    pub bumps: Vec<Bump>,
    pub delta: MetricDelta,
    pub nodes: Vec<NodeState>,
    /// Forward observed at the most recent trade/quote on this surface,
    /// needed to reprice nodes when the CC is rebuilt (`spec.md` §4.6
    /// updateCC rebase step). `None` until the surface has seen a trade.
    pub last_forward: Option<f64>,
}

impl Surface {
    fn new(t: f64, cc: SVIParams) -> Self {
        Self {
            t,
            cc,
            bumps: Vec::new(),
            delta: MetricDelta::default(),
            nodes: Vec::new(),
            last_forward: None,
        }
    }

    fn find_node(&self, strike: f64) -> Option<usize> {
        self.nodes.iter().position(|n| (n.strike - strike).abs() < 1e-9)
    }

    /// `iv_PC(k)`: Core Curve variance plus bump contributions, clipped to
    /// a small positive floor before the square root (`spec.md` §4.6).
    fn pc_iv(&self, k: f64, t: f64) -> f64 {
        let w = (svi_w(LogMoneyness::raw(k), &self.cc) + bump_variance(&self.bumps, k)).max(1e-12);
        (w / t.max(1e-12)).sqrt()
    }
}

/// EMA-tracked width coefficients (`spec.md` §4.6). Initial values are the
/// spec's listed defaults; only `floor` evolves at runtime via
/// [`RiskScorer::rescore_from_market`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RiskScorer {
    pub beta_gamma: f64,
    pub beta_l0: f64,
    pub beta_s0: f64,
    pub beta_c0: f64,
    pub beta_floor: f64,
}

impl Default for RiskScorer {
    fn default() -> Self {
        Self {
            beta_gamma: 1.0,
            beta_l0: 1.0,
            beta_s0: 0.5,
            beta_c0: 0.3,
            beta_floor: 0.5,
        }
    }
}

impl RiskScorer {
    /// `β_floor ← 0.3·avg_spread·0.5 + 0.7·β_floor`, applied once per
    /// observed batch sample in order.
    pub fn rescore_from_market(&mut self, avg_spreads: &[f64]) {
        for &avg_spread in avg_spreads {
            self.beta_floor = 0.3 * avg_spread * 0.5 + 0.7 * self.beta_floor;
        }
    }
}

/// Display/replenish sizing policy for [`get_quote`](DualSurfaceEngine::get_quote).
/// Not specified numerically in `spec.md` §4.6 beyond "minimum display, hard
/// cap, bounded by configured capacity" -- fixed here as a small constant
/// policy, overridable per engine instance.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DisplayPolicy {
    pub min_size: f64,
    pub max_size: f64,
    pub capacity: f64,
}

impl Default for DisplayPolicy {
    fn default() -> Self {
        Self {
            min_size: 1.0,
            max_size: 10.0,
            capacity: 50.0,
        }
    }
}

impl DisplayPolicy {
    fn size_for(&self, remaining_capacity: f64) -> f64 {
        remaining_capacity.clamp(self.min_size, self.max_size)
    }
}

/// A two-sided quote at one `(T, K, F)` point.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub pc_mid: f64,
    pub cc_mid: f64,
    pub edge: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub bucket: DeltaBucket,
}

/// Owns every expiry's `Surface` plus the shared `RiskScorer`. Exposed
/// operations follow the mutate/observe split of `spec.md` §5.
#[derive(Debug, Clone)]
pub struct DualSurfaceEngine {
    ctx: CoreContext,
    edge_params: BucketEdgeParams,
    display: DisplayPolicy,
    surfaces: Vec<Surface>,
    risk_scorer: RiskScorer,
    version: u64,
}

impl DualSurfaceEngine {
    pub fn new(ctx: CoreContext) -> Self {
        Self {
            ctx,
            edge_params: BucketEdgeParams::default(),
            display: DisplayPolicy::default(),
            surfaces: Vec::new(),
            risk_scorer: RiskScorer::default(),
            version: 0,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn risk_scorer(&self) -> &RiskScorer {
        &self.risk_scorer
    }

    pub fn risk_scorer_mut(&mut self) -> &mut RiskScorer {
        &mut self.risk_scorer
    }

    fn find_surface(&self, t: f64) -> Option<usize> {
        self.surfaces.iter().position(|s| (s.t - t).abs() < 1e-9)
    }

    fn price_quoted(&self, p: &SVIParams, strike: f64, t: f64, forward: f64, is_call: bool) -> Result<f64> {
        let k = LogMoneyness::from_strike_forward(strike, forward)?;
        let iv = svi_iv(k, t, p);
        let pg = price_and_greeks(forward, strike, t, iv, is_call, 1.0)?;
        Ok(self.ctx.market_spec.from_base_to_quoted(pg.price, forward))
    }

    /// Finite-difference sensitivity of the quoted CC price at `(strike,t,F)`
    /// to one trader metric, used to build the `get_quote` width (`spec.md`
    /// §4.6: `J_L0`, `J_S0`, `J_C0`).
    fn metric_jacobian(
        &self,
        base_metrics: &TraderMetrics,
        bump: impl Fn(&TraderMetrics) -> TraderMetrics,
        strike: f64,
        t: f64,
        forward: f64,
    ) -> Result<f64> {
        let base_price = self.price_quoted(
            &from_metrics(base_metrics, FromMetricsOptions { preserve_bumps: true }),
            strike,
            t,
            forward,
            true,
        )?;
        let bumped = bump(base_metrics);
        let bumped_price = self.price_quoted(
            &from_metrics(&bumped, FromMetricsOptions { preserve_bumps: true }),
            strike,
            t,
            forward,
            true,
        )?;
        Ok((bumped_price - base_price) / METRIC_BUMP_EPS)
    }

    fn rebuild_pc(&mut self, idx: usize) {
        let forward = match self.surfaces[idx].last_forward {
            Some(f) => f,
            None => return,
        };
        let cc = self.surfaces[idx].cc;

        // (bucket, vega, weighted-k-sum, weight-sum) -- the weighted k
        // average anchors each bucket's bump at the inventory that earned
        // it, rather than a fixed canonical strike.
        let mut by_bucket: Vec<(DeltaBucket, f64, f64, f64)> = Vec::new();
        for node in &self.surfaces[idx].nodes {
            if node.position == 0.0 {
                continue;
            }
            let k = match LogMoneyness::from_strike_forward(node.strike, forward) {
                Ok(k) => k,
                Err(_) => continue,
            };
            let iv = svi_iv(k, self.surfaces[idx].t, &cc);
            let vega = match price_and_greeks(forward, node.strike, self.surfaces[idx].t, iv, true, 1.0) {
                Ok(pg) => pg.vega,
                Err(_) => continue,
            };
            let contribution = node.position * vega;
            let weight = contribution.abs();
            match by_bucket.iter_mut().find(|(b, ..)| *b == node.last_bucket) {
                Some((_, v, wk, w)) => {
                    *v += contribution;
                    *wk += weight * k.value();
                    *w += weight;
                }
                None => by_bucket.push((node.last_bucket, contribution, weight * k.value(), weight)),
            }
        }

        let inv: Vec<(DeltaBucket, BucketInventory, f64)> = by_bucket
            .into_iter()
            .map(|(bucket, vega, weighted_k, weight)| {
                let count = self.surfaces[idx].nodes.iter().filter(|n| n.last_bucket == bucket).count();
                let k_center = if weight > 0.0 { weighted_k / weight } else { 0.0 };
                (bucket, BucketInventory { vega, count }, k_center)
            })
            .collect();

        let (bumps, delta) = apply_inventory_deformation(&cc, &inv, &self.edge_params, &self.ctx.svi_cfg);
        self.surfaces[idx].bumps = bumps;
        self.surfaces[idx].delta = delta;
    }

    /// Builds a new CC from `metrics`, validates it, and (for an existing
    /// surface) rebases every node's `pc_anchor` so the observed edge to the
    /// CC is preserved across the update (`spec.md` §4.6 updateCC).
    pub fn update_cc(&mut self, t: f64, metrics: TraderMetrics) -> Result<()> {
        let p = from_metrics(&metrics, FromMetricsOptions { preserve_bumps: true });
        let res = validate(&p, &self.ctx.svi_cfg);
        if !res.valid {
            return Err(Error::InvalidSvi {
                reason: "update_cc".to_string(),
                errors: res.errors,
            });
        }

        match self.find_surface(t) {
            Some(idx) => {
                if let Some(forward) = self.surfaces[idx].last_forward {
                    let old_cc = self.surfaces[idx].cc;
                    let snapshot: Vec<(f64, f64)> = self.surfaces[idx]
                        .nodes
                        .iter()
                        .map(|n| (n.strike, n.pc_anchor))
                        .collect();
                    let pending: Vec<(usize, f64)> = snapshot
                        .iter()
                        .enumerate()
                        .map(|(i, &(strike, anchor))| {
                            let old_mid = self.price_quoted(&old_cc, strike, t, forward, true).unwrap_or(anchor);
                            let new_mid = self.price_quoted(&p, strike, t, forward, true).unwrap_or(old_mid);
                            (i, new_mid + (anchor - old_mid))
                        })
                        .collect();
                    for (i, new_anchor) in pending {
                        self.surfaces[idx].nodes[i].pc_anchor = new_anchor;
                    }
                }
                self.surfaces[idx].cc = p;
                self.rebuild_pc(idx);
            }
            None => {
                self.surfaces.push(Surface::new(t, p));
            }
        }
        self.version += 1;
        Ok(())
    }

    /// Applies a trade: anchors the node's PC at the trade premium,
    /// accumulates position, refreshes the node's width reference and
    /// bucket, and rebuilds the PC smile from the new aggregate inventory
    /// (`spec.md` §4.6 onTrade).
    #[allow(clippy::too_many_arguments)]
    pub fn on_trade(&mut self, t: f64, strike: f64, forward: f64, premium: f64, size: f64, now: f64) -> Result<()> {
        let idx = self.find_surface(t).ok_or(Error::StaleSurface {
            expiry_years: t,
            operation: "on_trade",
        })?;

        self.surfaces[idx].last_forward = Some(forward);

        let k = LogMoneyness::from_strike_forward(strike, forward)?;
        let cc = self.surfaces[idx].cc;
        let iv_cc = svi_iv(k, t, &cc);
        let pg = price_and_greeks(forward, strike, t, iv_cc, true, 1.0)?;
        let bucket = DeltaBucket::classify(put_delta_abs(pg.delta, true, 1.0));
        let width_now = self.quote_width(&cc, strike, t, forward)?;

        let node_idx = match self.surfaces[idx].find_node(strike) {
            Some(i) => i,
            None => {
                self.surfaces[idx].nodes.push(NodeState {
                    strike,
                    pc_anchor: premium,
                    width_ref: width_now,
                    position: 0.0,
                    last_bucket: bucket,
                    last_trade_time: now,
                });
                self.surfaces[idx].nodes.len() - 1
            }
        };

        let node = &mut self.surfaces[idx].nodes[node_idx];
        node.pc_anchor = premium;
        node.position += -size;
        node.width_ref = width_now;
        node.last_trade_time = now;
        node.last_bucket = bucket;

        self.rebuild_pc(idx);
        self.version += 1;
        Ok(())
    }

    fn quote_width(&self, cc: &SVIParams, strike: f64, t: f64, forward: f64) -> Result<f64> {
        let k = LogMoneyness::from_strike_forward(strike, forward)?;
        let iv_cc = svi_iv(k, t, cc);
        let pg = price_and_greeks(forward, strike, t, iv_cc, true, 1.0)?;
        let cc_metrics = to_metrics(cc);

        let j_l0 = self.metric_jacobian(&cc_metrics, |m| TraderMetrics { l0: m.l0 + METRIC_BUMP_EPS, ..*m }, strike, t, forward)?;
        let j_s0 = self.metric_jacobian(&cc_metrics, |m| TraderMetrics { s0: m.s0 + METRIC_BUMP_EPS, ..*m }, strike, t, forward)?;
        let j_c0 = self.metric_jacobian(&cc_metrics, |m| TraderMetrics { c0: m.c0 + METRIC_BUMP_EPS, ..*m }, strike, t, forward)?;

        let rs = &self.risk_scorer;
        let base_width = rs.beta_floor
            + rs.beta_gamma * pg.gamma.abs()
            + rs.beta_l0 * j_l0.abs()
            + rs.beta_s0 * j_s0.abs()
            + rs.beta_c0 * j_c0.abs();
        Ok(self.ctx.market_spec.from_base_to_quoted(base_width, forward))
    }

    /// Computes a two-sided quote at `(T, K, F)` (`spec.md` §4.6 getQuote).
    pub fn get_quote(&self, t: f64, strike: f64, forward: f64, is_call: bool, now: f64) -> Result<Quote> {
        let idx = self.find_surface(t).ok_or(Error::StaleSurface {
            expiry_years: t,
            operation: "get_quote",
        })?;
        let surface = &self.surfaces[idx];

        let k = LogMoneyness::from_strike_forward(strike, forward)?;
        let iv_cc = svi_iv(k, t, &surface.cc);
        let cc_base = price_and_greeks(forward, strike, t, iv_cc, is_call, 1.0)?;
        let cc_mid = self.ctx.market_spec.from_base_to_quoted(cc_base.price, forward);

        let iv_pc = surface.pc_iv(k.value(), t);
        let pc_base = price_and_greeks(forward, strike, t, iv_pc, is_call, 1.0)?;
        let pc_mid = self.ctx.market_spec.from_base_to_quoted(pc_base.price, forward);

        let width = self.quote_width(&surface.cc, strike, t, forward)?;

        let node = surface.find_node(strike).map(|i| &surface.nodes[i]);
        let bucket = node
            .map(|n| n.last_bucket)
            .unwrap_or_else(|| DeltaBucket::classify(put_delta_abs(cc_base.delta, is_call, 1.0)));

        let mid = match node {
            Some(n) if n.position != 0.0 => {
                let sign_short = if n.position < 0.0 { 1.0 } else { -1.0 };
                let age_hours = ((now - n.last_trade_time) / 3600.0).max(0.0);
                let confidence = (-age_hours / self.ctx.stale_hours).exp();
                let anchor_adjusted = n.pc_anchor + sign_short * (width - n.width_ref);
                confidence * anchor_adjusted + (1.0 - confidence) * pc_mid
            }
            _ => pc_mid,
        };

        let remaining_capacity = self.display.capacity
            - surface
                .nodes
                .iter()
                .map(|n| n.position.abs())
                .sum::<f64>()
                .min(self.display.capacity);
        let size = self.display.size_for(remaining_capacity);

        Ok(Quote {
            bid: mid - width,
            ask: mid + width,
            pc_mid,
            cc_mid,
            edge: pc_mid - cc_mid,
            bid_size: size,
            ask_size: size,
            bucket,
        })
    }

    /// Aggregate inventory view across every surface: total vega, per-bucket
    /// vega/count, and the last applied per-expiry metric deltas
    /// (`spec.md` §6 getInventorySummary).
    pub fn get_inventory_summary(&self) -> (f64, Vec<(DeltaBucket, BucketInventory)>, Vec<(f64, MetricDelta)>) {
        let mut total_vega = 0.0;
        let mut by_bucket: Vec<(DeltaBucket, BucketInventory)> = Vec::new();
        let mut smile_adjustments = Vec::with_capacity(self.surfaces.len());

        for surface in &self.surfaces {
            smile_adjustments.push((surface.t, surface.delta));
            let forward = match surface.last_forward {
                Some(f) => f,
                None => continue,
            };
            for node in &surface.nodes {
                if node.position == 0.0 {
                    continue;
                }
                let k = match LogMoneyness::from_strike_forward(node.strike, forward) {
                    Ok(k) => k,
                    Err(_) => continue,
                };
                let iv = svi_iv(k, surface.t, &surface.cc);
                let vega = match price_and_greeks(forward, node.strike, surface.t, iv, true, 1.0) {
                    Ok(pg) => pg.vega,
                    Err(_) => continue,
                };
                let contribution = node.position * vega;
                total_vega += contribution;
                match by_bucket.iter_mut().find(|(b, _)| *b == node.last_bucket) {
                    Some((_, bi)) => {
                        bi.vega += contribution;
                        bi.count += 1;
                    }
                    None => by_bucket.push((
                        node.last_bucket,
                        BucketInventory {
                            vega: contribution,
                            count: 1,
                        },
                    )),
                }
            }
        }

        (total_vega, by_bucket, smile_adjustments)
    }

    /// Drops a surface entirely, e.g. on expiry roll.
    pub fn retire_expiry(&mut self, t: f64) {
        if let Some(idx) = self.find_surface(t) {
            self.surfaces.remove(idx);
            self.version += 1;
        }
    }

    /// Refreshes `RiskScorer.beta_floor` from a batch of observed average
    /// spreads (`spec.md` §4.6).
    pub fn rescore_from_market(&mut self, avg_spreads: &[f64]) {
        self.risk_scorer.rescore_from_market(avg_spreads);
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SviValidationConfig;
    use crate::market_spec::{MarketSpec, PremiumConvention};

    fn engine() -> DualSurfaceEngine {
        let ctx = CoreContext::new(MarketSpec::new("BTC", PremiumConvention::CryptoQuote, 5e-5));
        DualSurfaceEngine::new(ctx)
    }

    fn sample_metrics() -> TraderMetrics {
        TraderMetrics {
            l0: 0.04,
            s0: -0.1,
            c0: 0.5,
            s_neg: 0.2,
            s_pos: 0.2,
        }
    }

    #[test]
    fn update_cc_creates_a_surface_and_bumps_version() {
        let mut e = engine();
        assert_eq!(e.version(), 0);
        e.update_cc(0.25, sample_metrics()).unwrap();
        assert_eq!(e.version(), 1);
        assert!(e.find_surface(0.25).is_some());
    }

    #[test]
    fn update_cc_rejects_invalid_metrics() {
        let mut e = engine();
        let bad = TraderMetrics {
            l0: 0.04,
            s0: -10.0,
            c0: 0.5,
            s_neg: 9.0,
            s_pos: 9.0,
        };
        let res = e.update_cc(0.25, bad);
        assert!(matches!(res, Err(Error::InvalidSvi { .. })));
    }

    #[test]
    fn get_quote_on_unknown_expiry_is_stale() {
        let e = engine();
        let res = e.get_quote(0.25, 100_000.0, 97_000.0, true, 0.0);
        assert!(matches!(res, Err(Error::StaleSurface { .. })));
    }

    #[test]
    fn on_trade_then_get_quote_reflects_inventory() {
        let mut e = engine();
        e.update_cc(0.25, sample_metrics()).unwrap();
        e.on_trade(0.25, 97_000.0, 97_000.0, 0.02, 10.0, 0.0).unwrap();
        assert_eq!(e.version(), 2);

        let q = e.get_quote(0.25, 97_000.0, 97_000.0, true, 0.0).unwrap();
        assert!(q.bid < q.ask);
        assert!(q.bid_size > 0.0 && q.ask_size > 0.0);
    }

    #[test]
    fn retire_expiry_removes_the_surface() {
        let mut e = engine();
        e.update_cc(0.25, sample_metrics()).unwrap();
        e.retire_expiry(0.25);
        assert!(e.find_surface(0.25).is_none());
        let res = e.get_quote(0.25, 100_000.0, 97_000.0, true, 0.0);
        assert!(matches!(res, Err(Error::StaleSurface { .. })));
    }

    #[test]
    fn rescore_from_market_updates_beta_floor() {
        let mut e = engine();
        let before = e.risk_scorer().beta_floor;
        e.rescore_from_market(&[0.01, 0.01, 0.01]);
        assert_ne!(e.risk_scorer().beta_floor, before);
    }
}
