use chrono::{Duration, TimeZone, Utc};
use facility_booking::config::BookingPolicy;
use facility_booking::state::{BookingStatus, BookingType, Role};
use facility_booking::storage::MemoryStorage;
use facility_booking::tx::BookingRequest;
use facility_booking::BookingEngine;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Submit { machine: usize, day: i64, minutes: i64 },
    Approve(usize),
    Reject(usize),
    Cancel(usize),
    Adjust(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..2, 0i64..14, 1i64..=480).prop_map(|(machine, day, minutes)| Op::Submit {
            machine,
            day,
            minutes
        }),
        (0usize..16).prop_map(Op::Approve),
        (0usize..16).prop_map(Op::Reject),
        (0usize..16).prop_map(Op::Cancel),
        (-20i64..=20).prop_map(Op::Adjust),
    ]
}

fn seeded(tokens: u64) -> BookingEngine<MemoryStorage> {
    let engine = BookingEngine::open(MemoryStorage::new(), BookingPolicy::default()).unwrap();
    engine
        .register_user("admin", "admin", "Admin", Role::FacilityAdmin, 0)
        .unwrap();
    engine
        .register_user("admin", "acme", "Acme", Role::Startup, tokens)
        .unwrap();
    engine
        .register_machine("admin", "m-0", "Printer", "printing", Some(3))
        .unwrap();
    engine
        .register_machine("admin", "m-1", "Mill", "milling", None)
        .unwrap();
    engine
}

proptest! {
    /// Whatever sequence of commands runs, the balance never goes negative,
    /// equals given minus approved consumption, and the log agrees with it.
    #[test]
    fn prop_ledger_matches_approved_bookings(
        tokens in 0u64..100,
        ops in prop::collection::vec(op(), 1..40),
    ) {
        let engine = seeded(tokens);
        let start = Utc.with_ymd_and_hms(2026, 4, 6, 8, 0, 0).unwrap();
        let mut ids: Vec<String> = Vec::new();

        for op in ops {
            let _ = match op {
                Op::Submit { machine, day, minutes } => {
                    let begin = start + Duration::days(day);
                    engine
                        .submit_booking(BookingRequest {
                            user_id: "acme".to_string(),
                            machine_id: format!("m-{}", machine),
                            start: Some(begin),
                            end: Some(begin + Duration::minutes(minutes)),
                            booking_type: BookingType::MonthlyProvisional,
                            justification: None,
                        })
                        .map(|b| ids.push(b.id))
                }
                Op::Approve(_) | Op::Reject(_) | Op::Cancel(_) if ids.is_empty() => Ok(()),
                Op::Approve(i) => engine
                    .transition_booking(&ids[i % ids.len()], BookingStatus::Approved, "admin")
                    .map(|_| ()),
                Op::Reject(i) => engine
                    .transition_booking(&ids[i % ids.len()], BookingStatus::Rejected, "admin")
                    .map(|_| ()),
                Op::Cancel(i) => engine
                    .transition_booking(&ids[i % ids.len()], BookingStatus::Cancelled, "admin")
                    .map(|_| ()),
                Op::Adjust(amount) => engine
                    .adjust_tokens("admin", "acme", amount, "property run")
                    .map(|_| ()),
            };

            let balance = engine.get_balance("acme").unwrap();
            let approved: u64 = engine
                .bookings_for_user("acme")
                .unwrap()
                .iter()
                .filter(|b| b.status == BookingStatus::Approved)
                .map(|b| b.tokens_consumed)
                .sum();
            prop_assert!(balance.remaining >= 0);
            prop_assert_eq!(balance.consumed, approved);
            prop_assert_eq!(balance.remaining, balance.given as i64 - approved as i64);
            prop_assert!(engine.reconcile().is_ok());
        }
    }

    /// Approve then cancel returns the balance to where it started, and the
    /// charge is `ceil(hours * cost)` whatever the machine's hourly cost.
    #[test]
    fn prop_approve_then_cancel_conserves(minutes in 1i64..=480, cost_per_hour in 1u64..=12) {
        let engine = seeded(100);
        engine
            .register_machine("admin", "m-var", "Lathe", "turning", Some(cost_per_hour))
            .unwrap();
        let before = engine.get_balance("acme").unwrap();
        let begin = Utc.with_ymd_and_hms(2026, 4, 7, 10, 0, 0).unwrap();
        let booking = engine
            .submit_booking(BookingRequest {
                user_id: "acme".to_string(),
                machine_id: "m-var".to_string(),
                start: Some(begin),
                end: Some(begin + Duration::minutes(minutes)),
                booking_type: BookingType::WeeklyPlanning,
                justification: None,
            })
            .unwrap();
        let expected = (minutes as u64 * cost_per_hour).div_ceil(60);
        prop_assert_eq!(booking.tokens_consumed, expected);

        engine.transition_booking(&booking.id, BookingStatus::Approved, "admin").unwrap();
        let charged = engine.get_balance("acme").unwrap();
        prop_assert_eq!(charged.remaining, before.remaining - booking.tokens_consumed as i64);

        engine.transition_booking(&booking.id, BookingStatus::Cancelled, "admin").unwrap();
        prop_assert_eq!(engine.get_balance("acme").unwrap(), before);
    }
}
