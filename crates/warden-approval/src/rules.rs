//! Auto-approval rules.
//!
//! A rule lets a routine request skip human review. Rules are evaluated in
//! insertion order and the first match wins. A rule matches when it is
//! enabled, lists the request's category, permits the request's risk level,
//! and its pattern matches the action (case-insensitively). Matching records
//! the hit on the rule.
//!
//! Patterns are compiled when a rule is added or updated, so a malformed
//! regex is rejected up front instead of silently never matching.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_core::{RiskLevel, SharedClock, system_clock};

use crate::error::{ApprovalError, ApprovalResult};
use crate::request::{ApprovalCategory, ApprovalRequest, RememberScope};

/// A rule that approves matching requests without review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoApproveRule {
    /// Rule identifier.
    pub id: Uuid,
    /// Short name.
    pub name: String,
    /// What the rule is for.
    #[serde(default)]
    pub description: String,
    /// Categories the rule applies to.
    pub categories: Vec<ApprovalCategory>,
    /// Pattern matched against the request action.
    pub operation_pattern: String,
    /// Whether `operation_pattern` is a regex or an exact string.
    pub is_regex: bool,
    /// Highest risk level the rule may approve.
    pub max_risk_level: RiskLevel,
    /// Disabled rules never match.
    pub enabled: bool,
    /// Number of requests the rule has approved.
    #[serde(default)]
    pub apply_count: u64,
    /// When the rule last approved a request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied: Option<DateTime<Utc>>,
    /// When the rule was created.
    pub created_at: DateTime<Utc>,
}

impl AutoApproveRule {
    /// A regex rule.
    #[must_use]
    pub fn regex(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::with_pattern(name.into(), pattern.into(), true)
    }

    /// A rule matching one action string exactly, ignoring case.
    #[must_use]
    pub fn exact(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self::with_pattern(name.into(), action.into(), false)
    }

    fn with_pattern(name: String, operation_pattern: String, is_regex: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            description: String::new(),
            categories: vec![ApprovalCategory::ShellCommand],
            operation_pattern,
            is_regex,
            max_risk_level: RiskLevel::Low,
            enabled: true,
            apply_count: 0,
            last_applied: None,
            created_at: Utc::now(),
        }
    }

    /// Replace the category list.
    #[must_use]
    pub fn for_categories(mut self, categories: impl IntoIterator<Item = ApprovalCategory>) -> Self {
        self.categories = categories.into_iter().collect();
        self
    }

    /// Set the risk ceiling.
    #[must_use]
    pub fn with_max_risk(mut self, max: RiskLevel) -> Self {
        self.max_risk_level = max;
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Start disabled.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Partial update to a rule. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleUpdate {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New categories.
    pub categories: Option<Vec<ApprovalCategory>>,
    /// New pattern.
    pub operation_pattern: Option<String>,
    /// New pattern kind.
    pub is_regex: Option<bool>,
    /// New risk ceiling.
    pub max_risk_level: Option<RiskLevel>,
    /// Enable or disable.
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone)]
enum Matcher {
    Regex(Regex),
    Exact(String),
}

impl Matcher {
    fn compile(rule: &AutoApproveRule) -> ApprovalResult<Self> {
        if rule.is_regex {
            RegexBuilder::new(&rule.operation_pattern)
                .case_insensitive(true)
                .build()
                .map(Self::Regex)
                .map_err(|e| ApprovalError::InvalidPattern {
                    pattern: rule.operation_pattern.clone(),
                    reason: e.to_string(),
                })
        } else {
            Ok(Self::Exact(rule.operation_pattern.to_lowercase()))
        }
    }

    fn is_match(&self, action: &str) -> bool {
        match self {
            Self::Regex(re) => re.is_match(action),
            Self::Exact(expected) => action.to_lowercase() == *expected,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: AutoApproveRule,
    matcher: Matcher,
}

impl CompiledRule {
    fn new(rule: AutoApproveRule) -> ApprovalResult<Self> {
        let matcher = Matcher::compile(&rule)?;
        Ok(Self { rule, matcher })
    }

    fn matches(&self, request: &ApprovalRequest) -> bool {
        self.rule.enabled
            && self.rule.categories.contains(&request.category)
            && request.risk_level <= self.rule.max_risk_level
            && self.matcher.is_match(&request.action)
    }
}

/// Ordered set of auto-approval rules.
pub struct AutoApproveRuleEngine {
    rules: RwLock<Vec<CompiledRule>>,
    clock: SharedClock,
}

impl std::fmt::Debug for AutoApproveRuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoApproveRuleEngine")
            .field("rules", &self.read().len())
            .finish_non_exhaustive()
    }
}

impl Default for AutoApproveRuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoApproveRuleEngine {
    /// An engine with no rules.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            clock: system_clock(),
        }
    }

    /// An engine preloaded with rules for read-only introspection commands.
    #[must_use]
    pub fn with_default_rules() -> Self {
        let engine = Self::new();
        let compiled = default_rules()
            .into_iter()
            .filter_map(|rule| match CompiledRule::new(rule) {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!(error = %e, "Skipping built-in auto-approve rule");
                    None
                },
            })
            .collect();
        *engine.write() = compiled;
        engine
    }

    /// Read time from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<CompiledRule>> {
        self.rules.read().unwrap_or_else(|e| {
            warn!("Rule engine lock was poisoned, recovering");
            e.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<CompiledRule>> {
        self.rules.write().unwrap_or_else(|e| {
            warn!("Rule engine lock was poisoned, recovering");
            e.into_inner()
        })
    }

    /// First enabled rule matching `request`, after recording the hit.
    pub fn should_auto_approve(&self, request: &ApprovalRequest) -> Option<AutoApproveRule> {
        let mut rules = self.write();
        let compiled = rules.iter_mut().find(|c| c.matches(request))?;
        compiled.rule.apply_count = compiled.rule.apply_count.saturating_add(1);
        compiled.rule.last_applied = Some(self.clock.now());
        debug!(
            rule = %compiled.rule.name,
            action = %request.action,
            "Auto-approve rule matched"
        );
        Some(compiled.rule.clone())
    }

    /// Append a rule.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::InvalidPattern`] if the regex does not compile.
    pub fn add_rule(&self, rule: AutoApproveRule) -> ApprovalResult<Uuid> {
        let compiled = CompiledRule::new(rule)?;
        let id = compiled.rule.id;
        info!(rule = %compiled.rule.name, pattern = %compiled.rule.operation_pattern, "Auto-approve rule added");
        self.write().push(compiled);
        Ok(id)
    }

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::RuleNotFound`] or [`ApprovalError::InvalidPattern`].
    /// A failed update leaves the rule unchanged.
    pub fn update_rule(&self, id: Uuid, update: RuleUpdate) -> ApprovalResult<AutoApproveRule> {
        let mut rules = self.write();
        let slot = rules
            .iter_mut()
            .find(|c| c.rule.id == id)
            .ok_or(ApprovalError::RuleNotFound(id))?;

        let mut rule = slot.rule.clone();
        if let Some(name) = update.name {
            rule.name = name;
        }
        if let Some(description) = update.description {
            rule.description = description;
        }
        if let Some(categories) = update.categories {
            rule.categories = categories;
        }
        if let Some(pattern) = update.operation_pattern {
            rule.operation_pattern = pattern;
        }
        if let Some(is_regex) = update.is_regex {
            rule.is_regex = is_regex;
        }
        if let Some(max) = update.max_risk_level {
            rule.max_risk_level = max;
        }
        if let Some(enabled) = update.enabled {
            rule.enabled = enabled;
        }

        *slot = CompiledRule::new(rule)?;
        Ok(slot.rule.clone())
    }

    /// Enable or disable a rule.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::RuleNotFound`].
    pub fn set_enabled(&self, id: Uuid, enabled: bool) -> ApprovalResult<()> {
        let mut rules = self.write();
        let slot = rules
            .iter_mut()
            .find(|c| c.rule.id == id)
            .ok_or(ApprovalError::RuleNotFound(id))?;
        slot.rule.enabled = enabled;
        Ok(())
    }

    /// Remove a rule, returning it.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::RuleNotFound`].
    pub fn remove_rule(&self, id: Uuid) -> ApprovalResult<AutoApproveRule> {
        let mut rules = self.write();
        let index = rules
            .iter()
            .position(|c| c.rule.id == id)
            .ok_or(ApprovalError::RuleNotFound(id))?;
        let removed = rules.remove(index).rule;
        info!(rule = %removed.name, "Auto-approve rule removed");
        Ok(removed)
    }

    /// Look up a rule.
    #[must_use]
    pub fn get_rule(&self, id: Uuid) -> Option<AutoApproveRule> {
        self.read()
            .iter()
            .find(|c| c.rule.id == id)
            .map(|c| c.rule.clone())
    }

    /// All rules in evaluation order.
    #[must_use]
    pub fn list_rules(&self) -> Vec<AutoApproveRule> {
        self.read().iter().map(|c| c.rule.clone()).collect()
    }

    /// Rules for persistence, in evaluation order.
    #[must_use]
    pub fn export(&self) -> Vec<AutoApproveRule> {
        self.list_rules()
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Replace every rule with `rules`.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::InvalidPattern`] for the first rule that does not
    /// compile, or [`ApprovalError::InvalidSnapshot`] for a duplicate ID.
    /// Nothing is replaced on error.
    pub fn import(&self, rules: Vec<AutoApproveRule>) -> ApprovalResult<usize> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            if compiled.iter().any(|c: &CompiledRule| c.rule.id == rule.id) {
                return Err(ApprovalError::InvalidSnapshot(format!(
                    "duplicate rule {}",
                    rule.id
                )));
            }
            compiled.push(CompiledRule::new(rule)?);
        }
        let count = compiled.len();
        *self.write() = compiled;
        Ok(count)
    }

    /// Synthesize and add a rule from an approved request.
    ///
    /// - `Exact` matches the full action string
    /// - `Similar` matches any action with the same first token
    /// - `Category` matches anything in the request's category
    ///
    /// The learned rule never approves above the request's own risk level.
    /// An identical existing rule is reused instead of duplicated.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::InvalidRequest`] if the action is empty.
    pub fn learn_from_decision(
        &self,
        request: &ApprovalRequest,
        scope: RememberScope,
    ) -> ApprovalResult<AutoApproveRule> {
        let pattern = match scope {
            // Patterns run against the action as submitted, whitespace included.
            RememberScope::Exact => {
                if request.action.trim().is_empty() {
                    return Err(ApprovalError::InvalidRequest(
                        "cannot learn from an empty action".to_owned(),
                    ));
                }
                format!("^{}$", regex::escape(&request.action))
            },
            RememberScope::Similar => {
                let base = request.action.split_whitespace().next().ok_or_else(|| {
                    ApprovalError::InvalidRequest("cannot learn from an empty action".to_owned())
                })?;
                format!(r"^\s*{}(\s|$)", regex::escape(base))
            },
            RememberScope::Category => ".*".to_owned(),
        };

        if let Some(existing) = self.read().iter().find(|c| {
            c.rule.is_regex
                && c.rule.operation_pattern == pattern
                && c.rule.categories == [request.category]
                && c.rule.max_risk_level == request.risk_level
        }) {
            return Ok(existing.rule.clone());
        }

        let scope_label = match scope {
            RememberScope::Exact => "exact",
            RememberScope::Similar => "similar",
            RememberScope::Category => "category",
        };
        let mut rule = AutoApproveRule::regex(
            format!("learned-{scope_label}-{}", request.category),
            pattern,
        )
        .for_categories([request.category])
        .with_max_risk(request.risk_level)
        .with_description(format!("Learned from approval of {}", request.id));
        rule.created_at = self.clock.now();

        self.add_rule(rule.clone())?;
        Ok(rule)
    }
}

fn default_rules() -> Vec<AutoApproveRule> {
    let read_only = [
        (
            "git-read-only",
            r"^git\s+(status|log|diff|show|branch)(\s|$)",
            "Version-control status and history",
        ),
        (
            "package-listing",
            r"^(npm|yarn|pnpm)\s+(ls|list|outdated)(\s|$)",
            "Package manager listing",
        ),
        ("cargo-tree", r"^cargo\s+tree(\s|$)", "Cargo dependency tree"),
    ];
    read_only
        .into_iter()
        .map(|(name, pattern, description)| {
            AutoApproveRule::regex(name, pattern)
                .for_categories([ApprovalCategory::ShellCommand])
                .with_max_risk(RiskLevel::Medium)
                .with_description(description)
        })
        .collect()
}

#[cfg(test)]
#[path = "rules_tests.rs"]
mod tests;
