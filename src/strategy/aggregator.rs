use crate::models::{IndicatorVotes, Signal};

/// How many concurring indicator votes a trade needs.
///
/// This is a tunable, not a constant: it trades signal sensitivity against
/// the false-positive rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgreementPolicy {
    /// Any single BUY or SELL vote triggers the trade.
    Any,
    /// Require at least `n` concurring votes.
    AtLeast(usize),
}

impl Default for AgreementPolicy {
    fn default() -> Self {
        // Conservative default: two of three indicators must agree
        AgreementPolicy::AtLeast(2)
    }
}

impl AgreementPolicy {
    fn threshold(&self) -> usize {
        match self {
            AgreementPolicy::Any => 1,
            AgreementPolicy::AtLeast(n) => (*n).max(1),
        }
    }
}

/// Combines indicator votes into a single trade decision.
#[derive(Debug, Clone, Default)]
pub struct SignalAggregator {
    policy: AgreementPolicy,
}

impl SignalAggregator {
    pub fn new(policy: AgreementPolicy) -> Self {
        Self { policy }
    }

    /// Resolve the vote breakdown into one decision. A BUY/SELL tie is
    /// always HOLD — never guess a direction from a split vote.
    pub fn decide(&self, votes: &IndicatorVotes) -> Signal {
        let buys = votes.iter().filter(|v| *v == Signal::Buy).count();
        let sells = votes.iter().filter(|v| *v == Signal::Sell).count();

        if buys == sells {
            return Signal::Hold;
        }

        let threshold = self.policy.threshold();
        if buys > sells && buys >= threshold {
            Signal::Buy
        } else if sells > buys && sells >= threshold {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn votes(sma: Signal, rsi: Signal, macd: Signal) -> IndicatorVotes {
        IndicatorVotes { sma, rsi, macd }
    }

    #[test]
    fn test_all_hold_is_hold() {
        let agg = SignalAggregator::default();
        assert_eq!(agg.decide(&IndicatorVotes::hold()), Signal::Hold);
    }

    #[test]
    fn test_default_requires_two_votes() {
        let agg = SignalAggregator::default();
        assert_eq!(
            agg.decide(&votes(Signal::Buy, Signal::Hold, Signal::Hold)),
            Signal::Hold
        );
        assert_eq!(
            agg.decide(&votes(Signal::Buy, Signal::Buy, Signal::Hold)),
            Signal::Buy
        );
        assert_eq!(
            agg.decide(&votes(Signal::Sell, Signal::Sell, Signal::Sell)),
            Signal::Sell
        );
    }

    #[test]
    fn test_any_policy_triggers_on_single_vote() {
        let agg = SignalAggregator::new(AgreementPolicy::Any);
        assert_eq!(
            agg.decide(&votes(Signal::Hold, Signal::Sell, Signal::Hold)),
            Signal::Sell
        );
    }

    #[test]
    fn test_buy_sell_tie_is_hold() {
        // One of each, third holding: never guess a direction
        let agg = SignalAggregator::new(AgreementPolicy::Any);
        assert_eq!(
            agg.decide(&votes(Signal::Buy, Signal::Sell, Signal::Hold)),
            Signal::Hold
        );
    }

    #[test]
    fn test_majority_beats_minority_under_any() {
        let agg = SignalAggregator::new(AgreementPolicy::Any);
        assert_eq!(
            agg.decide(&votes(Signal::Buy, Signal::Buy, Signal::Sell)),
            Signal::Buy
        );
    }

    #[test]
    fn test_unreachable_threshold_holds() {
        let agg = SignalAggregator::new(AgreementPolicy::AtLeast(3));
        assert_eq!(
            agg.decide(&votes(Signal::Buy, Signal::Buy, Signal::Hold)),
            Signal::Hold
        );
    }
}
