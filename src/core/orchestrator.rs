//! Auto-gift orchestrator.
//!
//! One run refreshes stale rule dates, then walks every active rule whose next occurrence
//! falls inside the reminder window. Depending on how many days are left a rule gets a
//! reminder with gift suggestions, a checkout for a pending order, or nothing. Both
//! actions are recorded (`notified` event, order row) and a recorded action is never
//! repeated for the same occurrence.

use crate::{
    config::NotificationGate,
    core::{
        Pipeline,
        dates::{self, DateType},
        event_log::{EventPayload, EventRefs, append_event, has_event, record_failure},
        orders::{NewOrder, create_order, find_order_for_occurrence},
        report::{OrchestratorSummary, format_cents, format_orchestrator_summary},
        status::{OrderStatus, PaymentStatus},
        timing::{RunOptions, add_days, days_until},
    },
    entities::{GiftingRule, GiftingRuleColumn, gifting_rule},
    errors::{Error, Result},
    models::{GiftProduct, ShippingAddress},
    services::{CheckoutMetadata, CheckoutRequest, Notification},
};
use chrono::NaiveDate;
use sea_orm::{ActiveValue::Unchanged, Condition, QueryOrder, Set, prelude::*};
use tracing::{debug, error, info, warn};

/// How many suggestions a reminder carries.
const REMINDER_CANDIDATES: u64 = 5;

/// Runs the orchestrator once.
///
/// # Errors
/// Only a failed batch query or a consistency error aborts the run; every other per-rule
/// failure is recorded in the summary.
pub async fn run(pipeline: &Pipeline, options: RunOptions) -> Result<OrchestratorSummary> {
    let today = options.today();
    let simulated = options.is_simulated();
    let timing = &pipeline.config.timing;
    let mut summary = OrchestratorSummary::new(today, simulated, &pipeline.config);

    info!(%today, simulated, "Starting auto-gift run");

    refresh_rule_dates(pipeline, today, simulated, &mut summary).await?;

    let horizon = add_days(today, timing.notification_lead_days);
    let rules = GiftingRule::find()
        .filter(GiftingRuleColumn::Active.eq(true))
        .filter(GiftingRuleColumn::ScheduledDate.between(today, horizon))
        .order_by_asc(GiftingRuleColumn::ScheduledDate)
        .order_by_asc(GiftingRuleColumn::Id)
        .all(&pipeline.db)
        .await?;

    for rule in rules {
        let Some(occurrence) = rule.scheduled_date else {
            continue;
        };
        summary.rules_scanned += 1;

        if let Err(e) = process_rule(pipeline, &rule, occurrence, today, simulated, &mut summary).await {
            if e.is_fatal() {
                return Err(e);
            }
            error!(rule_id = rule.id, error = %e, "Auto-gift processing failed");
            record_failure(
                &pipeline.db,
                EventRefs::rule(rule.id, Some(occurrence)),
                "auto_gift",
                &e,
                simulated,
            )
            .await;
            summary.fail(rule.id, &e);
        }
    }

    info!("{}", format_orchestrator_summary(&summary));
    Ok(summary)
}

/// Whether an action with `lead_days` lead time is due with `days_left` to go.
#[must_use]
pub fn gate_matches(gate: NotificationGate, days_left: i64, lead_days: i64) -> bool {
    match gate {
        NotificationGate::Exact => days_left == lead_days,
        NotificationGate::CatchUp => (0..=lead_days).contains(&days_left),
    }
}

/// Resolves active rules that have no date yet or whose date has passed.
async fn refresh_rule_dates(
    pipeline: &Pipeline,
    today: NaiveDate,
    simulated: bool,
    summary: &mut OrchestratorSummary,
) -> Result<()> {
    let stale = GiftingRule::find()
        .filter(GiftingRuleColumn::Active.eq(true))
        .filter(
            Condition::any()
                .add(GiftingRuleColumn::ScheduledDate.is_null())
                .add(GiftingRuleColumn::ScheduledDate.lt(today)),
        )
        .order_by_asc(GiftingRuleColumn::Id)
        .all(&pipeline.db)
        .await?;

    for rule in stale {
        let refs = EventRefs::rule(rule.id, rule.scheduled_date);
        match refresh_rule(pipeline, &rule, today, simulated).await {
            Ok(Some(resolved)) => {
                debug!(rule_id = rule.id, %resolved, "Resolved next occurrence");
                summary.dates_resolved += 1;
                summary.details.resolved_rule_ids.push(rule.id);
            }
            Ok(None) => {
                summary.skip(rule.id, "one-off date has passed; rule deactivated");
            }
            Err(e @ Error::DateUnresolvable { .. }) => {
                warn!(rule_id = rule.id, "Could not resolve event date");
                let payload = EventPayload::ResolutionFailed {
                    reason: format!(
                        "date_type={} event_date={:?} holiday_key={:?}",
                        rule.date_type, rule.event_date, rule.holiday_key
                    ),
                };
                if let Err(log_error) = append_event(&pipeline.db, refs, &payload, simulated).await {
                    warn!(rule_id = rule.id, error = %log_error, "Could not record resolution failure");
                }
                summary.fail(rule.id, &e);
            }
            Err(e) => {
                error!(rule_id = rule.id, error = %e, "Date refresh failed");
                record_failure(&pipeline.db, refs, "date_refresh", &e, simulated).await;
                summary.fail(rule.id, &e);
            }
        }
    }
    Ok(())
}

/// Stores the next occurrence of `rule`. Returns `Ok(None)` when a one-off custom date
/// has passed and the rule was deactivated instead.
async fn refresh_rule(
    pipeline: &Pipeline,
    rule: &gifting_rule::Model,
    today: NaiveDate,
    simulated: bool,
) -> Result<Option<NaiveDate>> {
    let unresolvable = || Error::DateUnresolvable { rule_id: rule.id };
    let date_type: DateType = rule.date_type.parse().map_err(|_| unresolvable())?;

    let birthday_fallback = match (date_type, &rule.event_date, &rule.recipient_id) {
        (DateType::Birthday, None, Some(recipient_id)) => pipeline
            .services
            .profiles
            .profile(recipient_id)
            .await?
            .and_then(|profile| profile.date_of_birth),
        _ => None,
    };
    let event_date = rule.event_date.as_deref().or(birthday_fallback.as_deref());

    let resolved = dates::resolve_event(date_type, event_date, rule.holiday_key.as_deref(), today);

    let Some(resolved) = resolved else {
        let passed_one_off = date_type == DateType::Custom
            && event_date.is_some_and(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").is_ok());
        if !passed_one_off {
            return Err(unresolvable());
        }
        gifting_rule::ActiveModel {
            id: Unchanged(rule.id),
            active: Set(false),
            updated_at: Set(chrono::Utc::now()),
            ..Default::default()
        }
        .update(&pipeline.db)
        .await?;
        info!(rule_id = rule.id, "Deactivated rule whose one-off date has passed");
        return Ok(None);
    };

    gifting_rule::ActiveModel {
        id: Unchanged(rule.id),
        scheduled_date: Set(Some(resolved)),
        updated_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .update(&pipeline.db)
    .await?;

    append_event(
        &pipeline.db,
        EventRefs::rule(rule.id, Some(resolved)),
        &EventPayload::DateResolved {
            previous: rule.scheduled_date,
            resolved,
        },
        simulated,
    )
    .await?;

    Ok(Some(resolved))
}

/// Evaluates the reminder and the commitment for one rule. The two steps are independent:
/// a failed reminder is recorded and the commitment is still attempted.
async fn process_rule(
    pipeline: &Pipeline,
    rule: &gifting_rule::Model,
    occurrence: NaiveDate,
    today: NaiveDate,
    simulated: bool,
    summary: &mut OrchestratorSummary,
) -> Result<()> {
    let timing = &pipeline.config.timing;
    let days_left = days_until(occurrence, today);
    let mut acted = false;
    let mut failed = false;
    let mut reasons: Vec<&str> = Vec::new();

    if gate_matches(timing.notification_gate, days_left, timing.notification_lead_days) {
        if has_event(&pipeline.db, "notified", rule.id, occurrence).await? {
            reasons.push("already notified");
        } else {
            match notify_owner(pipeline, rule, occurrence, days_left, simulated).await {
                Ok(()) => {
                    summary.notified += 1;
                    summary.details.notified_rule_ids.push(rule.id);
                    acted = true;
                }
                Err(e) => {
                    step_failed(pipeline, rule.id, occurrence, "reminder", e, simulated, summary)
                        .await?;
                    failed = true;
                }
            }
        }
    }

    if gate_matches(timing.notification_gate, days_left, timing.capture_lead_days) {
        if find_order_for_occurrence(&pipeline.db, rule.id, occurrence)
            .await?
            .is_some()
        {
            reasons.push("order already exists");
        } else {
            match create_checkout(pipeline, rule, occurrence, simulated).await {
                Ok(order_id) => {
                    summary.checkout_created += 1;
                    summary.details.checkout_order_ids.push(order_id);
                    acted = true;
                }
                Err(e) => {
                    step_failed(pipeline, rule.id, occurrence, "checkout", e, simulated, summary)
                        .await?;
                    failed = true;
                }
            }
        }
    }

    if !acted && !failed {
        if reasons.is_empty() {
            reasons.push("nothing due");
        }
        summary.skip(rule.id, reasons.join("; "));
    }
    Ok(())
}

/// Records a failed step of a rule. Fatal errors are handed back to abort the run.
async fn step_failed(
    pipeline: &Pipeline,
    rule_id: i64,
    occurrence: NaiveDate,
    stage: &str,
    e: Error,
    simulated: bool,
    summary: &mut OrchestratorSummary,
) -> Result<()> {
    if e.is_fatal() {
        return Err(e);
    }
    error!(rule_id, stage, error = %e, "Auto-gift step failed");
    record_failure(
        &pipeline.db,
        EventRefs::rule(rule_id, Some(occurrence)),
        stage,
        &e,
        simulated,
    )
    .await;
    summary.fail(rule_id, &e);
    Ok(())
}

async fn notify_owner(
    pipeline: &Pipeline,
    rule: &gifting_rule::Model,
    occurrence: NaiveDate,
    days_left: i64,
    simulated: bool,
) -> Result<()> {
    let candidates = reminder_candidates(pipeline, rule).await?;
    let recipient_name = recipient_display_name(pipeline, rule).await?;
    let candidate_count = candidates.len();

    pipeline
        .services
        .notifier
        .send(&Notification::GiftReminder {
            to_user_id: rule.owner_id.clone(),
            recipient_name,
            occasion: occasion_label(rule),
            event_date: occurrence,
            candidates,
        })
        .await?;

    append_event(
        &pipeline.db,
        EventRefs::rule(rule.id, Some(occurrence)),
        &EventPayload::Notified {
            days_until: days_left,
            candidate_count,
        },
        simulated,
    )
    .await?;

    info!(rule_id = rule.id, days_left, candidate_count, "Sent gift reminder");
    Ok(())
}

async fn create_checkout(
    pipeline: &Pipeline,
    rule: &gifting_rule::Model,
    occurrence: NaiveDate,
    simulated: bool,
) -> Result<i64> {
    let payment_method_ref = rule
        .payment_method_ref
        .clone()
        .filter(|r| !r.trim().is_empty())
        .ok_or(Error::PaymentMethodMissing { rule_id: rule.id })?;
    let gift = choose_gift(pipeline, rule).await?;
    let shipping_address = recipient_address(pipeline, rule).await?;
    let currency = pipeline.config.payments.currency.clone();

    let request = CheckoutRequest {
        owner_id: rule.owner_id.clone(),
        amount_cents: gift.price_cents,
        currency: currency.clone(),
        products: vec![gift.clone()],
        shipping_address: shipping_address.clone(),
        delivery_date: occurrence,
        payment_method_ref: payment_method_ref.clone(),
        metadata: CheckoutMetadata {
            is_auto_gift: true,
            rule_id: rule.id,
            occurrence_date: occurrence,
        },
    };
    let session = pipeline.services.checkout.create_session(&request).await?;

    let order = create_order(
        &pipeline.db,
        NewOrder {
            owner_id: rule.owner_id.clone(),
            rule_id: Some(rule.id),
            execution_id: None,
            status: OrderStatus::PendingPayment,
            payment_status: PaymentStatus::RequiresSetup,
            currency,
            products: vec![gift.clone()],
            shipping_address: Some(shipping_address),
            delivery_date: occurrence,
            payment_method_ref: Some(payment_method_ref),
            payment_authorization_ref: None,
            setup_ref: session.setup_ref.clone(),
            checkout_session_id: Some(session.session_id.clone()),
            hold_until: None,
            is_auto_gift: true,
        },
    )
    .await?;

    append_event(
        &pipeline.db,
        EventRefs::rule(rule.id, Some(occurrence)).with_order(order.id),
        &EventPayload::CheckoutCreated {
            session_id: session.session_id,
            product_id: gift.product_id,
            amount_cents: gift.price_cents,
        },
        simulated,
    )
    .await?;

    info!(
        rule_id = rule.id,
        order_id = order.id,
        amount = %format_cents(gift.price_cents),
        "Created auto-gift checkout"
    );
    Ok(order.id)
}

/// Inexpensive-first suggestions within budget: the recipient's wishlist, else catalog.
async fn reminder_candidates(
    pipeline: &Pipeline,
    rule: &gifting_rule::Model,
) -> Result<Vec<GiftProduct>> {
    let mut candidates = affordable_wishlist(pipeline, rule).await?;
    if candidates.is_empty() {
        return pipeline
            .services
            .catalog
            .search(
                rule.gift_preferences.as_deref(),
                rule.budget_limit_cents,
                REMINDER_CANDIDATES,
            )
            .await;
    }
    candidates.sort_by_key(|p| p.price_cents);
    candidates.truncate(usize::try_from(REMINDER_CANDIDATES).unwrap_or(usize::MAX));
    Ok(candidates)
}

/// The most valuable wishlist item within budget, else the best catalog match.
async fn choose_gift(pipeline: &Pipeline, rule: &gifting_rule::Model) -> Result<GiftProduct> {
    let wishlist = affordable_wishlist(pipeline, rule).await?;
    if let Some(best) = wishlist.into_iter().max_by_key(|p| p.price_cents) {
        return Ok(best);
    }

    pipeline
        .services
        .catalog
        .search(
            rule.gift_preferences.as_deref(),
            rule.budget_limit_cents,
            REMINDER_CANDIDATES,
        )
        .await?
        .into_iter()
        .max_by_key(|p| p.price_cents)
        .ok_or(Error::NoAffordableGift {
            budget_cents: rule.budget_limit_cents,
        })
}

async fn affordable_wishlist(
    pipeline: &Pipeline,
    rule: &gifting_rule::Model,
) -> Result<Vec<GiftProduct>> {
    let Some(recipient_id) = &rule.recipient_id else {
        return Ok(Vec::new());
    };
    Ok(pipeline
        .services
        .catalog
        .wishlist(recipient_id)
        .await?
        .into_iter()
        .filter(|p| p.price_cents <= rule.budget_limit_cents)
        .collect())
}

async fn recipient_address(
    pipeline: &Pipeline,
    rule: &gifting_rule::Model,
) -> Result<ShippingAddress> {
    let unavailable = || Error::AddressUnavailable {
        recipient: rule
            .recipient_id
            .clone()
            .or_else(|| rule.pending_recipient_email.clone())
            .unwrap_or_else(|| format!("rule {}", rule.id)),
    };
    let Some(recipient_id) = &rule.recipient_id else {
        return Err(unavailable());
    };
    pipeline
        .services
        .profiles
        .profile(recipient_id)
        .await?
        .and_then(|profile| profile.shipping_address)
        .ok_or_else(unavailable)
}

/// Name used for the recipient in messages.
pub(crate) async fn recipient_display_name(
    pipeline: &Pipeline,
    rule: &gifting_rule::Model,
) -> Result<String> {
    if let Some(name) = rule.recipient_name.clone().filter(|n| !n.trim().is_empty()) {
        return Ok(name);
    }
    if let Some(recipient_id) = &rule.recipient_id {
        if let Some(profile) = pipeline.services.profiles.profile(recipient_id).await? {
            return Ok(profile.display_name);
        }
    }
    Ok(rule
        .pending_recipient_email
        .clone()
        .unwrap_or_else(|| "your recipient".to_string()))
}

fn occasion_label(rule: &gifting_rule::Model) -> String {
    match rule.date_type.parse::<DateType>() {
        Ok(DateType::Holiday) => rule
            .holiday_key
            .as_deref()
            .map_or_else(|| "holiday".to_string(), |key| key.replace('_', " ")),
        Ok(DateType::Birthday) => "birthday".to_string(),
        _ => "special occasion".to_string(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{
        core::event_log::events_of_type,
        entities::Order,
        test_utils::{
            RuleSpec, TestHarness, date, insert_catalog_product, insert_profile,
            insert_rule_with, insert_wishlist_item, sample_address, set_date_of_birth,
        },
    };

    async fn birthday_harness() -> Result<(TestHarness, gifting_rule::Model)> {
        let harness = TestHarness::new().await?;
        insert_profile(&harness.db, "bob", "Bob", Some(&sample_address("Bob"))).await?;
        insert_wishlist_item(&harness.db, "bob", "w-1", "Candle", 1500).await?;
        insert_wishlist_item(&harness.db, "bob", "w-2", "Headphones", 4500).await?;
        insert_wishlist_item(&harness.db, "bob", "w-3", "Guitar", 90000).await?;
        let rule = insert_rule_with(
            &harness.db,
            RuleSpec {
                event_date: Some("03-10".to_string()),
                ..RuleSpec::birthday("alice", "bob")
            },
        )
        .await?;
        Ok((harness, rule))
    }

    #[test]
    fn test_gate_matches() {
        assert!(gate_matches(NotificationGate::Exact, 7, 7));
        assert!(!gate_matches(NotificationGate::Exact, 6, 7));
        assert!(gate_matches(NotificationGate::CatchUp, 6, 7));
        assert!(gate_matches(NotificationGate::CatchUp, 0, 7));
        assert!(!gate_matches(NotificationGate::CatchUp, 8, 7));
        assert!(!gate_matches(NotificationGate::CatchUp, -1, 7));
    }

    #[tokio::test]
    async fn test_reminder_seven_days_before_birthday() -> Result<()> {
        let (harness, rule) = birthday_harness().await?;

        let summary = run(&harness.pipeline, RunOptions::simulated(date(2025, 3, 3))).await?;

        assert_eq!(summary.dates_resolved, 1);
        assert_eq!(summary.rules_scanned, 1);
        assert_eq!(summary.notified, 1);
        assert_eq!(summary.checkout_created, 0);

        let sent = harness.notifier.sent();
        assert_eq!(sent.len(), 1);
        let Notification::GiftReminder {
            to_user_id,
            event_date,
            candidates,
            ..
        } = &sent[0]
        else {
            panic!("expected a gift reminder, got {:?}", sent[0]);
        };
        assert_eq!(to_user_id, "alice");
        assert_eq!(*event_date, date(2025, 3, 10));
        let prices: Vec<_> = candidates.iter().map(|p| p.price_cents).collect();
        assert_eq!(prices, vec![1500, 4500]);

        let notified = events_of_type(&harness.db, "notified").await?;
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].rule_id, Some(rule.id));
        assert!(notified[0].is_simulated);
        Ok(())
    }

    #[tokio::test]
    async fn test_reminder_not_repeated_for_same_occurrence() -> Result<()> {
        let (harness, _rule) = birthday_harness().await?;
        run(&harness.pipeline, RunOptions::simulated(date(2025, 3, 3))).await?;
        let second = run(&harness.pipeline, RunOptions::simulated(date(2025, 3, 3))).await?;

        assert_eq!(second.notified, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(harness.notifier.sent().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_checkout_four_days_before_birthday() -> Result<()> {
        let (harness, rule) = birthday_harness().await?;

        let summary = run(&harness.pipeline, RunOptions::simulated(date(2025, 3, 6))).await?;
        assert_eq!(summary.checkout_created, 1);

        let requests = harness.checkout.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].metadata.is_auto_gift);
        assert_eq!(requests[0].metadata.rule_id, rule.id);
        // Most valuable wishlist item within budget
        assert_eq!(requests[0].products[0].product_id, "w-2");
        assert_eq!(requests[0].amount_cents, 4500);

        let orders = Order::find().all(&harness.db).await?;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, "pending_payment");
        assert_eq!(orders[0].payment_status, "requires_setup");
        assert!(orders[0].is_auto_gift);
        assert_eq!(orders[0].rule_id, Some(rule.id));
        assert_eq!(orders[0].setup_ref.as_deref(), Some("seti_1"));
        assert_eq!(events_of_type(&harness.db, "checkout_created").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_double_checkout_on_rerun() -> Result<()> {
        let (harness, _rule) = birthday_harness().await?;
        let options = RunOptions::simulated(date(2025, 3, 6));
        run(&harness.pipeline, options).await?;
        let second = run(&harness.pipeline, options).await?;

        assert_eq!(second.checkout_created, 0);
        assert_eq!(harness.checkout.requests().len(), 1);
        assert_eq!(Order::find().count(&harness.db).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_exact_gate_misses_skipped_days() -> Result<()> {
        let (mut harness, _rule) = birthday_harness().await?;
        harness.configure(|config| config.timing.notification_gate = NotificationGate::Exact);

        let summary = run(&harness.pipeline, RunOptions::simulated(date(2025, 3, 4))).await?;
        assert_eq!(summary.notified, 0);
        assert_eq!(summary.checkout_created, 0);
        assert_eq!(summary.details.skipped[0].reason, "nothing due");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_payment_method_fails_rule_only() -> Result<()> {
        let (harness, _rule) = birthday_harness().await?;
        insert_profile(&harness.db, "dan", "Dan", Some(&sample_address("Dan"))).await?;
        let broken = insert_rule_with(
            &harness.db,
            RuleSpec {
                event_date: Some("03-10".to_string()),
                payment_method_ref: None,
                ..RuleSpec::birthday("carol", "dan")
            },
        )
        .await?;
        insert_catalog_product(&harness.db, "c-1", "Mug", 1200, "kitchen", true).await?;

        let summary = run(&harness.pipeline, RunOptions::simulated(date(2025, 3, 6))).await?;

        assert_eq!(summary.checkout_created, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.details.failures[0].id, broken.id);
        let failures = events_of_type(&harness.db, "processing_failed").await?;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].rule_id, Some(broken.id));
        Ok(())
    }

    #[tokio::test]
    async fn test_catch_up_gate_acts_on_a_missed_lead_day() -> Result<()> {
        let (mut harness, _rule) = birthday_harness().await?;
        harness.configure(|config| config.timing.notification_gate = NotificationGate::CatchUp);

        let summary = run(&harness.pipeline, RunOptions::simulated(date(2025, 3, 4))).await?;
        assert_eq!(summary.notified, 1);
        assert_eq!(summary.checkout_created, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_reminder_does_not_block_checkout() -> Result<()> {
        let (mut harness, rule) = birthday_harness().await?;
        harness.configure(|config| config.timing.notification_gate = NotificationGate::CatchUp);
        harness.notifier.fail_sends("smtp down");

        let summary = run(&harness.pipeline, RunOptions::simulated(date(2025, 3, 6))).await?;

        assert_eq!(summary.notified, 0);
        assert_eq!(summary.checkout_created, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(harness.checkout.requests().len(), 1);
        assert!(events_of_type(&harness.db, "notified").await?.is_empty());

        let failures = events_of_type(&harness.db, "processing_failed").await?;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].rule_id, Some(rule.id));
        assert!(matches!(
            EventPayload::from_value(failures[0].payload.clone()),
            EventPayload::ProcessingFailed { ref stage, .. } if stage == "reminder"
        ));

        // The reminder is still owed and goes out once the notifier recovers
        harness.notifier.recover();
        let second = run(&harness.pipeline, RunOptions::simulated(date(2025, 3, 6))).await?;
        assert_eq!(second.notified, 1);
        assert_eq!(second.checkout_created, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_catalog_fallback_when_wishlist_is_over_budget() -> Result<()> {
        let harness = TestHarness::new().await?;
        insert_profile(&harness.db, "bob", "Bob", Some(&sample_address("Bob"))).await?;
        insert_wishlist_item(&harness.db, "bob", "w-9", "Car", 9_000_000).await?;
        insert_catalog_product(&harness.db, "c-1", "Tea", 1800, "food", true).await?;
        insert_catalog_product(&harness.db, "c-2", "Cheese", 3500, "food", true).await?;
        insert_catalog_product(&harness.db, "c-3", "Lamp", 3000, "home", true).await?;
        insert_rule_with(
            &harness.db,
            RuleSpec {
                event_date: Some("03-10".to_string()),
                gift_preferences: Some("food".to_string()),
                ..RuleSpec::birthday("alice", "bob")
            },
        )
        .await?;

        run(&harness.pipeline, RunOptions::simulated(date(2025, 3, 6))).await?;
        let requests = harness.checkout.requests();
        assert_eq!(requests[0].products[0].product_id, "c-2");
        Ok(())
    }

    #[tokio::test]
    async fn test_holiday_rule_resolves_and_passed_dates_refresh() -> Result<()> {
        let harness = TestHarness::new().await?;
        insert_profile(&harness.db, "bob", "Bob", Some(&sample_address("Bob"))).await?;
        let rule = insert_rule_with(
            &harness.db,
            RuleSpec {
                date_type: "holiday".to_string(),
                holiday_key: Some("thanksgiving".to_string()),
                scheduled_date: Some(date(2024, 11, 28)),
                ..RuleSpec::birthday("alice", "bob")
            },
        )
        .await?;

        let summary = run(&harness.pipeline, RunOptions::simulated(date(2025, 3, 3))).await?;
        assert_eq!(summary.dates_resolved, 1);
        assert_eq!(summary.rules_scanned, 0);

        let refreshed = GiftingRule::find_by_id(rule.id).one(&harness.db).await?.unwrap();
        assert_eq!(refreshed.scheduled_date, Some(date(2025, 11, 27)));
        Ok(())
    }

    #[tokio::test]
    async fn test_unresolvable_rule_is_counted() -> Result<()> {
        let harness = TestHarness::new().await?;
        insert_rule_with(
            &harness.db,
            RuleSpec {
                date_type: "holiday".to_string(),
                holiday_key: Some("festivus_maximus".to_string()),
                ..RuleSpec::birthday("alice", "bob")
            },
        )
        .await?;

        let summary = run(&harness.pipeline, RunOptions::simulated(date(2025, 3, 3))).await?;
        assert_eq!(summary.failed, 1);
        assert_eq!(events_of_type(&harness.db, "resolution_failed").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_passed_one_off_custom_date_deactivates_rule() -> Result<()> {
        let harness = TestHarness::new().await?;
        let rule = insert_rule_with(
            &harness.db,
            RuleSpec {
                date_type: "custom".to_string(),
                event_date: Some("2024-06-01".to_string()),
                ..RuleSpec::birthday("alice", "bob")
            },
        )
        .await?;

        let summary = run(&harness.pipeline, RunOptions::simulated(date(2025, 3, 3))).await?;
        assert_eq!(summary.skipped, 1);
        let stored = GiftingRule::find_by_id(rule.id).one(&harness.db).await?.unwrap();
        assert!(!stored.active);
        Ok(())
    }

    #[tokio::test]
    async fn test_birthday_falls_back_to_profile_date_of_birth() -> Result<()> {
        let harness = TestHarness::new().await?;
        insert_profile(&harness.db, "bob", "Bob", None).await?;
        set_date_of_birth(&harness.db, "bob", "1990-03-10").await?;
        let rule = insert_rule_with(&harness.db, RuleSpec::birthday("alice", "bob")).await?;

        run(&harness.pipeline, RunOptions::simulated(date(2025, 3, 3))).await?;
        let stored = GiftingRule::find_by_id(rule.id).one(&harness.db).await?.unwrap();
        assert_eq!(stored.scheduled_date, Some(date(2025, 3, 10)));
        Ok(())
    }
}
