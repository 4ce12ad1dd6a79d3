use medrag_domain::guardrail::{
	EmailGuardrail, Guardrail, GuardrailAction, GuardrailManager, GuardrailSeverity,
	ValidationPhase,
};

const QUESTION: &str = "Please email support@company.com about patient Rosenbaum.";

#[test]
fn block_with_blocked_domain_raises_before_returning_text() {
	let guardrail = EmailGuardrail::new(GuardrailAction::Block, GuardrailSeverity::High)
		.with_blocked_domains(["company.com"]);
	let result = guardrail.validate(QUESTION);

	assert!(result.triggered);
	assert_eq!(result.entities_found, vec!["support@company.com".to_string()]);

	let manager = GuardrailManager::new().with(guardrail);
	let blocked =
		manager.check(QUESTION, ValidationPhase::Input).expect_err("Expected a guardrail block.");

	assert_eq!(blocked.result.action, GuardrailAction::Block);
	assert!(blocked.to_string().contains("Blocked domains detected: support@company.com"));
	assert!(blocked.report.tags.contains(&"blocked".to_string()));
}

#[test]
fn warn_masking_removes_literal_address() {
	let manager = GuardrailManager::new().with(
		EmailGuardrail::new(GuardrailAction::Warn, GuardrailSeverity::Medium).with_masking('*'),
	);
	let outcome = manager.check(QUESTION, ValidationPhase::Input).expect("WARN must not block.");

	assert!(outcome.masked);
	assert!(!outcome.text.contains("support@company.com"));
	assert!(outcome.text.contains("s*****t@c******.c**"));
	assert_eq!(outcome.text.len(), QUESTION.len());
	assert_eq!(outcome.report.metadata["masking_applied"], serde_json::json!(true));
	assert_eq!(outcome.report.metadata["validation_phase"], serde_json::json!("input"));
}

#[test]
fn block_wins_regardless_of_registration_order() {
	let warn = EmailGuardrail::new(GuardrailAction::Warn, GuardrailSeverity::Low).with_masking('*');
	let block = EmailGuardrail::new(GuardrailAction::Block, GuardrailSeverity::Critical);

	for manager in [
		GuardrailManager::new().with(warn.clone()).with(block.clone()),
		GuardrailManager::new().with(block).with(warn),
	] {
		let blocked = manager
			.check(QUESTION, ValidationPhase::Output)
			.expect_err("BLOCK must take priority.");

		assert_eq!(blocked.result.severity, GuardrailSeverity::Critical);
	}
}

#[test]
fn log_action_leaves_text_untouched() {
	let manager = GuardrailManager::new().with(
		EmailGuardrail::new(GuardrailAction::Log, GuardrailSeverity::Low).with_masking('*'),
	);
	let outcome = manager.check(QUESTION, ValidationPhase::Output).expect("LOG must not block.");

	assert!(!outcome.masked);
	assert_eq!(outcome.text, QUESTION);
	assert_eq!(outcome.results.len(), 1);
}

#[test]
fn common_domains_trigger_only_when_enabled() {
	let text = "Reach me at jane.doe@gmail.com";
	let lenient = EmailGuardrail::new(GuardrailAction::Warn, GuardrailSeverity::Medium);
	let strict = lenient.clone().blocking_common_domains();

	assert!(!lenient.validate(text).triggered);

	let result = strict.validate(text);

	assert!(result.triggered);
	assert!(result.message.starts_with("Common domains detected"));
}

#[test]
fn allowed_domains_are_reported_in_details() {
	let guardrail = EmailGuardrail::new(GuardrailAction::Warn, GuardrailSeverity::Medium)
		.with_allowed_domains(["clinic.org"]);
	let result = guardrail.validate("a@clinic.org and b@other.net");

	assert_eq!(result.details["allowed_emails"], serde_json::json!(["a@clinic.org"]));
	assert_eq!(result.details["total_emails"], serde_json::json!(2));
}

#[test]
fn manager_from_config_respects_enabled_flag() {
	let mut cfg = medrag_config::Guardrails::default();

	assert_eq!(GuardrailManager::from_config(&cfg).map(|manager| manager.len()), Some(1));

	cfg.enabled = false;

	assert!(GuardrailManager::from_config(&cfg).is_none());
}
