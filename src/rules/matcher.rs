//! Compiled rule set and the matcher that walks it in input order.

use tokio::sync::RwLock;

use crate::config::Rule;
use crate::rules::predicate::{
    EthTypePredicate, IpPredicate, IpProtoPredicate, MacPredicate, MatchInput, PortPredicate,
};

/// One rule after its textual predicates have been parsed; unparseable
/// entries are simply absent from the corresponding vector.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule_name: String,
    pub ip: Vec<IpPredicate>,
    pub port: Vec<PortPredicate>,
    pub mac: Vec<MacPredicate>,
    pub eth_type: Vec<EthTypePredicate>,
    pub ip_proto: Vec<IpProtoPredicate>,
}

impl CompiledRule {
    fn compile(rule: &Rule) -> CompiledRule {
        CompiledRule {
            rule_name: rule.rule_name.clone(),
            ip: rule.ip.iter().filter_map(|s| IpPredicate::parse(s)).collect(),
            port: rule
                .port
                .iter()
                .filter_map(|s| PortPredicate::parse(s))
                .collect(),
            mac: rule
                .mac
                .iter()
                .filter_map(|s| MacPredicate::parse(s))
                .collect(),
            eth_type: rule
                .eth_type
                .iter()
                .filter_map(|s| EthTypePredicate::parse(s))
                .collect(),
            ip_proto: rule
                .ip_protocol
                .iter()
                .filter_map(|s| IpProtoPredicate::parse(s))
                .collect(),
        }
    }

    /// A rule matches iff any compiled predicate across any field matches —
    /// disjunctive across all predicates of the rule, not per-field
    /// conjunction.
    fn is_match(&self, packet: MatchInput) -> bool {
        self.ip.iter().any(|p| p.is_match(packet))
            || self
                .port
                .iter()
                .any(|p| p.is_match(packet.src_port) || p.is_match(packet.dst_port))
            || self
                .mac
                .iter()
                .any(|p| p.is_match(packet.src_mac) || p.is_match(packet.dst_mac))
            || self.eth_type.iter().any(|p| p.is_match(packet.eth_type))
            || self.ip_proto.iter().any(|p| p.is_match(packet.ip_proto))
    }

    /// `true` if at least one field produced a compiled predicate — an empty
    /// `CompiledRule` can never match and is excluded from the committed set.
    fn has_predicates(&self) -> bool {
        !self.ip.is_empty()
            || !self.port.is_empty()
            || !self.mac.is_empty()
            || !self.eth_type.is_empty()
            || !self.ip_proto.is_empty()
    }
}

/// Holds the currently-compiled rule set; rebuilt atomically on `set_rules`.
/// Matching walks rules in input order and stops at the first match, per the
/// no-rule-priority non-goal.
pub struct RuleMatcher {
    compiled: RwLock<Vec<CompiledRule>>,
}

impl RuleMatcher {
    pub fn new(rules: &[Rule]) -> RuleMatcher {
        let compiled: Vec<CompiledRule> = rules
            .iter()
            .map(CompiledRule::compile)
            .filter(CompiledRule::has_predicates)
            .collect();
        RuleMatcher {
            compiled: RwLock::new(compiled),
        }
    }

    /// Recompiles from `rules`, committing only if at least one rule produced
    /// a non-empty predicate set. Returns the number of rules compiled.
    pub async fn compile(&self, rules: &[Rule]) -> usize {
        let compiled: Vec<CompiledRule> = rules
            .iter()
            .map(CompiledRule::compile)
            .filter(CompiledRule::has_predicates)
            .collect();
        let count = compiled.len();
        if count > 0 {
            *self.compiled.write().await = compiled;
        }
        count
    }

    pub async fn match_packet(&self, packet: MatchInput<'_>) -> Option<String> {
        let compiled = self.compiled.read().await;
        compiled
            .iter()
            .find(|rule| rule.is_match(packet))
            .map(|rule| rule.rule_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{EtherType, IpProtocol};

    fn dns_rule() -> Rule {
        Rule {
            rule_name: "dns".into(),
            port: vec!["53".into()],
            ip_protocol: vec!["tcp".into()],
            ..Default::default()
        }
    }

    fn packet(src_port: u16, dst_port: u16, ip_proto: IpProtocol) -> MatchInput<'static> {
        MatchInput {
            src_ip: "1.2.3.4",
            dst_ip: "5.6.7.8",
            src_port,
            dst_port,
            src_mac: "aa:bb:cc:dd:ee:01",
            dst_mac: "11:22:33:44:55:66",
            eth_type: EtherType(0x0800),
            ip_proto,
            country_code: "",
            city: "",
        }
    }

    #[tokio::test]
    async fn test_rule_matches_by_port_or_protocol_disjunctively() {
        let matcher = RuleMatcher::new(&[dns_rule()]);

        // dst port 53, proto UDP -> matches on port predicate
        let udp_53 = packet(5000, 53, IpProtocol(17));
        assert_eq!(matcher.match_packet(udp_53).await.as_deref(), Some("dns"));

        // proto TCP, port 80 -> matches on ip_protocol predicate
        let tcp_80 = packet(5000, 80, IpProtocol(6));
        assert_eq!(matcher.match_packet(tcp_80).await.as_deref(), Some("dns"));

        // proto UDP, port 80 -> no match
        let udp_80 = packet(5000, 80, IpProtocol(17));
        assert_eq!(matcher.match_packet(udp_80).await, None);
    }

    #[tokio::test]
    async fn test_compile_rejects_all_unparseable_rules() {
        let matcher = RuleMatcher::new(&[]);
        let bad_rule = Rule {
            rule_name: "bad".into(),
            ip: vec!["not an ip".into()],
            ..Default::default()
        };
        let count = matcher.compile(&[bad_rule]).await;
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_first_match_wins_in_input_order() {
        let catch_all = Rule {
            rule_name: "catch-all".into(),
            port: vec!["1-65535".into()],
            ..Default::default()
        };
        let matcher = RuleMatcher::new(&[dns_rule(), catch_all]);
        let udp_53 = packet(5000, 53, IpProtocol(17));
        assert_eq!(matcher.match_packet(udp_53).await.as_deref(), Some("dns"));
    }
}
