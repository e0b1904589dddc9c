//! Join point for the three notification subscriptions
//!
//! Enabling notifications on `data`, `mode` and `liveStream` is issued all at
//! once and the completions come back in any order. The session may only
//! become ready when all three have succeeded, and the first failure decides
//! the outcome.

use crate::session::CharacteristicRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    /// Recorded, still waiting on other subscriptions
    Waiting,
    /// The last subscription just succeeded; fires once
    Ready,
    /// First failure; fires once
    Failed(CharacteristicRole),
    /// The barrier already settled, or the role is not a subscription
    Ignored,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscriptionBarrier {
    data: bool,
    mode: bool,
    live_stream: bool,
    settled: bool,
}

impl SubscriptionBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all_enabled(&self) -> bool {
        self.data && self.mode && self.live_stream
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn record(&mut self, role: CharacteristicRole, ok: bool) -> BarrierOutcome {
        if self.settled {
            return BarrierOutcome::Ignored;
        }

        let flag = match role {
            CharacteristicRole::Data => &mut self.data,
            CharacteristicRole::Mode => &mut self.mode,
            CharacteristicRole::LiveStream => &mut self.live_stream,
            CharacteristicRole::Command => return BarrierOutcome::Ignored,
        };

        if !ok {
            self.settled = true;
            return BarrierOutcome::Failed(role);
        }

        *flag = true;
        if self.all_enabled() {
            self.settled = true;
            BarrierOutcome::Ready
        } else {
            BarrierOutcome::Waiting
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CharacteristicRole::*;

    const PERMUTATIONS: [[CharacteristicRole; 3]; 6] = [
        [Data, Mode, LiveStream],
        [Data, LiveStream, Mode],
        [Mode, Data, LiveStream],
        [Mode, LiveStream, Data],
        [LiveStream, Data, Mode],
        [LiveStream, Mode, Data],
    ];

    #[test]
    fn ready_fires_once_in_every_order() {
        for order in PERMUTATIONS {
            let mut barrier = SubscriptionBarrier::new();
            let outcomes: Vec<_> = order.iter().map(|&r| barrier.record(r, true)).collect();
            assert_eq!(
                outcomes,
                vec![
                    BarrierOutcome::Waiting,
                    BarrierOutcome::Waiting,
                    BarrierOutcome::Ready
                ],
                "order {order:?}"
            );
            assert!(barrier.all_enabled());
            assert_eq!(barrier.record(order[0], true), BarrierOutcome::Ignored);
        }
    }

    #[test]
    fn any_failure_prevents_ready() {
        for order in PERMUTATIONS {
            for failing in 0..3 {
                let mut barrier = SubscriptionBarrier::new();
                let mut ready = 0;
                let mut failed = Vec::new();
                for (i, &role) in order.iter().enumerate() {
                    match barrier.record(role, i != failing) {
                        BarrierOutcome::Ready => ready += 1,
                        BarrierOutcome::Failed(r) => failed.push(r),
                        _ => {}
                    }
                }
                assert_eq!(ready, 0, "order {order:?} failing {failing}");
                assert_eq!(failed, vec![order[failing]]);
                assert!(!barrier.all_enabled());
            }
        }
    }

    #[test]
    fn duplicate_success_is_idempotent() {
        let mut barrier = SubscriptionBarrier::new();
        assert_eq!(barrier.record(Data, true), BarrierOutcome::Waiting);
        assert_eq!(barrier.record(Data, true), BarrierOutcome::Waiting);
        assert_eq!(barrier.record(Mode, true), BarrierOutcome::Waiting);
        assert_eq!(barrier.record(LiveStream, true), BarrierOutcome::Ready);
    }

    #[test]
    fn command_role_is_not_a_subscription() {
        let mut barrier = SubscriptionBarrier::new();
        assert_eq!(barrier.record(Command, false), BarrierOutcome::Ignored);
        assert!(!barrier.is_settled());
    }
}
