use std::fmt;

use super::TokenLedger;
use crate::validation_constants::COST_PER_TOKEN_USD;

const TOP_AGENTS: usize = 10;

fn phase_display_name(phase: &str) -> &str {
    match phase {
        "coordination" => "Coordination",
        "phase1_knowledge_query" => "Knowledge Query",
        "phase2_pattern_application" => "Pattern Application",
        "phase2_documentation_planning" => "Documentation Planning",
        "phase2_data_flow_analysis" => "Data Flow Analysis",
        "phase3_gap_analysis" => "Gap Analysis",
        "phase4_enhanced_analysis" => "Enhanced Analysis",
        "phase5_cross_reference" => "Cross-Reference",
        "phase5_svg_analysis" => "SVG Analysis",
        "phase6_execution_bridge" => "Execution Bridge",
        other => other,
    }
}

pub fn estimated_cost(tokens: u64) -> f64 {
    tokens as f64 * COST_PER_TOKEN_USD
}

/// End-of-session summary of a ledger, rendered through `Display`
#[derive(Debug, Clone, Copy)]
pub struct TokenReport<'a> {
    ledger: &'a TokenLedger,
}

impl<'a> TokenReport<'a> {
    pub fn new(ledger: &'a TokenLedger) -> Self {
        Self { ledger }
    }

    pub fn duration_secs(&self) -> i64 {
        (self.ledger.last_update - self.ledger.session_start)
            .num_seconds()
            .max(0)
    }

    pub fn duration_display(&self) -> String {
        let secs = self.duration_secs();
        format!("{}m {}s", secs / 60, secs % 60)
    }

    pub fn tokens_per_minute(&self) -> u64 {
        let minutes = self.duration_secs() as f64 / 60.0;
        if minutes > 0.0 {
            (self.ledger.total as f64 / minutes) as u64
        } else {
            0
        }
    }

    /// Highest spenders first; ties break on name
    pub fn top_agents(&self) -> Vec<(&'a str, u64)> {
        let mut agents: Vec<(&str, u64)> = self
            .ledger
            .by_agent
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        agents.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        agents.truncate(TOP_AGENTS);
        agents
    }

    /// Lowest spender; a rough stand-in for efficiency on similar tasks
    pub fn most_efficient_agent(&self) -> Option<(&'a str, u64)> {
        self.ledger
            .by_agent
            .iter()
            .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(k, v)| (k.as_str(), *v))
    }

    /// Enhanced analysis if it ran, otherwise the knowledge query phase
    pub fn highest_value_phase(&self) -> Option<(&'static str, u64)> {
        ["phase4_enhanced_analysis", "phase1_knowledge_query"]
            .into_iter()
            .find_map(|phase| {
                let tokens = self.ledger.by_phase.get(phase).copied().unwrap_or(0);
                (tokens > 0).then(|| (phase_display_name(phase), tokens))
            })
    }

    pub fn optimization_hints(&self) -> Vec<&'static str> {
        let total = self.ledger.total as f64;
        let mut hints = Vec::new();
        let delegation = self.ledger.by_agent.get("delegation_chain").copied().unwrap_or(0);
        if total > 0.0 && delegation as f64 > total * 0.3 {
            hints.push("Optimize specialist delegation chains");
        }
        let phase2: u64 = self
            .ledger
            .by_phase
            .iter()
            .filter(|(k, _)| k.starts_with("phase2_"))
            .map(|(_, v)| *v)
            .sum();
        if total > 0.0 && phase2 as f64 > total * 0.4 {
            hints.push("Consider phase 2 optimization");
        }
        if hints.is_empty() {
            hints.push("Current token allocation appears optimal");
        }
        hints
    }

    fn write_breakdown<'b>(
        f: &mut fmt::Formatter<'_>,
        rows: impl Iterator<Item = (&'b str, u64)>,
        sum: u64,
        empty: &str,
    ) -> fmt::Result {
        let mut any = false;
        for (name, tokens) in rows {
            any = true;
            let pct = if sum > 0 {
                tokens as f64 / sum as f64 * 100.0
            } else {
                0.0
            };
            writeln!(f, "   • {}: {} tokens ({:.1}%)", name, tokens, pct)?;
        }
        if !any {
            writeln!(f, "   {}", empty)?;
        }
        Ok(())
    }
}

impl fmt::Display for TokenReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ledger = self.ledger;
        if ledger.total == 0 {
            return writeln!(f, "No token usage recorded for this session.");
        }

        writeln!(f, "🧭 COMPASS Token Usage Report")?;
        writeln!(f, "════════════════════════════════════════════════════════════════")?;
        writeln!(f)?;
        writeln!(f, "📊 SESSION SUMMARY:")?;
        writeln!(f, "   • Total Tokens Used: {} tokens", ledger.total)?;
        writeln!(f, "   • Estimated Cost: ~${:.4}", estimated_cost(ledger.total))?;
        writeln!(f, "   • Analysis Duration: {}", self.duration_display())?;
        writeln!(f, "   • Average Tokens/Minute: {}", self.tokens_per_minute())?;
        writeln!(f)?;

        writeln!(f, "🔧 AGENT BREAKDOWN:")?;
        let agent_sum: u64 = ledger.by_agent.values().sum();
        Self::write_breakdown(
            f,
            self.top_agents().into_iter(),
            agent_sum,
            "No agent usage recorded",
        )?;
        writeln!(f)?;

        writeln!(f, "📈 PHASE ANALYSIS:")?;
        let phase_sum: u64 = ledger.by_phase.values().sum();
        Self::write_breakdown(
            f,
            ledger
                .by_phase
                .iter()
                .map(|(k, v)| (phase_display_name(k), *v)),
            phase_sum,
            "No phase usage recorded",
        )?;
        writeln!(f)?;

        writeln!(f, "🎯 INSIGHTS:")?;
        match ledger.most_expensive_phase() {
            Some((phase, tokens)) => writeln!(
                f,
                "   • Most Expensive Phase: {} ({} tokens)",
                phase_display_name(phase),
                tokens
            )?,
            None => writeln!(f, "   • Most Expensive Phase: None yet")?,
        }
        match self.most_efficient_agent() {
            Some((agent, tokens)) => {
                writeln!(f, "   • Most Efficient Agent: {} ({} tokens)", agent, tokens)?
            }
            None => writeln!(f, "   • Most Efficient Agent: Unknown")?,
        }
        match self.highest_value_phase() {
            Some((phase, tokens)) => {
                writeln!(f, "   • Highest Value Agent: {} ({} tokens)", phase, tokens)?
            }
            None => writeln!(f, "   • Highest Value Agent: Unknown")?,
        }
        writeln!(f, "   • Optimization: {}", self.optimization_hints().join("; "))?;
        writeln!(f, "════════════════════════════════════════════════════════════════")
    }
}
