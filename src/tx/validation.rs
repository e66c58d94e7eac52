use crate::config::BookingPolicy;
use crate::error::{Error, Result, TransitionError, ValidationError};
use crate::state::ledger;
use crate::state::{
    Booking, BookingStatus, BookingType, LedgerEffect, Machine, MachineCatalog, State, User,
    UserDirectory,
};
use crate::tx::{BookingRequest, Command, CommandKind};
use chrono::{DateTime, Utc};

const MS_PER_HOUR: u128 = 3_600_000;

/// Context for validation and apply.
///
/// `seq` is the position the command will occupy in the command log; it seeds
/// deterministic ids so live apply and replay agree.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub seq: u64,
    pub policy: BookingPolicy,
}

impl ValidationContext {
    pub fn new(seq: u64, policy: BookingPolicy) -> Self {
        ValidationContext { seq, policy }
    }

    pub fn with_default_policy(seq: u64) -> Self {
        ValidationContext::new(seq, BookingPolicy::default())
    }

    /// Context for re-applying a logged command: the policy it was admitted
    /// under wins over `fallback`, so replay never re-decides policy.
    pub fn replay_for_command(seq: u64, cmd: &Command, fallback: &BookingPolicy) -> Self {
        let policy = cmd.policy.clone().unwrap_or_else(|| fallback.clone());
        ValidationContext::new(seq, policy)
    }
}

/// Largest token amount a single allocation may hold; balances are `i64`.
pub const MAX_TOKENS: u64 = i64::MAX as u64;

fn check_token_bound(amount: u64, what: &str) -> Result<()> {
    if amount > MAX_TOKENS {
        return Err(ValidationError::InvalidAmount(format!(
            "{} of {} exceeds the maximum of {}",
            what, amount, MAX_TOKENS
        ))
        .into());
    }
    Ok(())
}

/// A validated request: everything needed to admit the booking as `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDraft {
    pub user_id: String,
    pub machine_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub booking_type: BookingType,
    pub justification: Option<String>,
    pub tokens_consumed: u64,
}

impl BookingDraft {
    pub fn into_booking(self, id: String, at: DateTime<Utc>) -> Booking {
        Booking {
            id,
            user_id: self.user_id,
            machine_id: self.machine_id,
            start: self.start,
            end: self.end,
            booking_type: self.booking_type,
            status: BookingStatus::Pending,
            justification: self.justification,
            tokens_consumed: self.tokens_consumed,
            created_at: at,
            updated_at: at,
            approved_by: None,
        }
    }
}

/// Token cost of a slot: `ceil(duration_hours * cost_per_hour)`.
///
/// Computed in integer milliseconds so the result is exact.
pub fn compute_tokens(duration_ms: i64, cost_per_hour: u64) -> Result<u64> {
    let duration_ms = u128::try_from(duration_ms).map_err(|_| ValidationError::InvalidTimeRange)?;
    let scaled = duration_ms * u128::from(cost_per_hour);
    let tokens = scaled.div_ceil(MS_PER_HOUR);
    u64::try_from(tokens).map_err(|_| {
        Error::from(ValidationError::InvalidAmount(format!(
            "Token cost overflow: {} ms × {} per hour",
            duration_ms, cost_per_hour
        )))
    })
}

fn non_blank(s: Option<&str>) -> bool {
    s.map(|v| !v.trim().is_empty()).unwrap_or(false)
}

/// Booking validator. Checks run in a fixed order and the first failure wins:
/// required fields, time ordering, duration cap, justification, machine
/// availability, then token sufficiency against the ledger.
///
/// `existing_bookings` must include the user's bookings; only approved ones
/// count, so pending requests never hold tokens.
pub fn validate_booking<'a, I>(
    request: &BookingRequest,
    machine: Option<&Machine>,
    user: &User,
    existing_bookings: I,
    policy: &BookingPolicy,
) -> Result<BookingDraft>
where
    I: IntoIterator<Item = &'a Booking>,
{
    if request.machine_id.trim().is_empty() {
        return Err(ValidationError::MissingField("machine").into());
    }
    let start = request.start.ok_or(ValidationError::MissingField("start"))?;
    let end = request.end.ok_or(ValidationError::MissingField("end"))?;

    if end <= start {
        return Err(ValidationError::InvalidTimeRange.into());
    }

    let duration_ms = (end - start).num_milliseconds();
    if duration_ms > policy.max_duration_ms() {
        return Err(ValidationError::DurationExceeded {
            max_minutes: policy.max_duration_minutes,
            requested_ms: duration_ms,
        }
        .into());
    }

    if request.booking_type.requires_justification()
        && !non_blank(request.justification.as_deref())
    {
        return Err(ValidationError::JustificationRequired.into());
    }

    let machine =
        machine.ok_or_else(|| ValidationError::MachineNotFound(request.machine_id.clone()))?;
    if !machine.is_available() {
        return Err(ValidationError::MachineUnavailable {
            machine_id: machine.id.clone(),
            status: machine.status,
        }
        .into());
    }

    let required = compute_tokens(duration_ms, machine.effective_cost(policy.default_token_cost))?;
    let available = ledger::remaining_tokens(user, existing_bookings);
    if ledger::to_signed(required) > available {
        return Err(ValidationError::InsufficientTokens {
            required,
            available,
        }
        .into());
    }

    Ok(BookingDraft {
        user_id: user.id.clone(),
        machine_id: machine.id.clone(),
        start,
        end,
        booking_type: request.booking_type,
        justification: request
            .justification
            .as_ref()
            .map(|j| j.trim().to_string())
            .filter(|j| !j.is_empty()),
        tokens_consumed: required,
    })
}

fn lookup_user<'s>(state: &'s State, id: &str) -> Result<&'s User> {
    state
        .get_user(id)?
        .ok_or_else(|| ValidationError::UserNotFound(id.to_string()).into())
}

fn require_admin<'s>(state: &'s State, actor: &str, action: &'static str) -> Result<&'s User> {
    let unauthorized = || ValidationError::Unauthorized {
        actor: actor.to_string(),
        action,
    };
    let user = state.get_user(actor)?.ok_or_else(unauthorized)?;
    if !user.is_admin() {
        return Err(unauthorized().into());
    }
    Ok(user)
}

fn require_description(description: &str) -> Result<()> {
    if description.trim().is_empty() {
        return Err(ValidationError::DescriptionRequired.into());
    }
    Ok(())
}

/// Startups submit for themselves; admins may submit on anyone's behalf.
pub fn validate_submit_booking(
    state: &State,
    cmd: &Command,
    ctx: &ValidationContext,
) -> Result<BookingDraft> {
    let CommandKind::SubmitBooking(request) = &cmd.kind else {
        return Err(Error::InvalidCommand("Expected SubmitBooking command".to_string()));
    };

    let actor = state
        .get_user(&cmd.actor)?
        .ok_or_else(|| ValidationError::Unauthorized {
            actor: cmd.actor.clone(),
            action: "submit bookings",
        })?;
    if actor.id != request.user_id && !actor.is_admin() {
        return Err(ValidationError::Unauthorized {
            actor: cmd.actor.clone(),
            action: "book on behalf of another user",
        }
        .into());
    }

    let user = lookup_user(state, &request.user_id)?;
    let machine = if request.machine_id.trim().is_empty() {
        None
    } else {
        state.get_machine(&request.machine_id)?
    };

    validate_booking(request, machine, user, state.bookings.values(), &ctx.policy)
}

/// Check a status change against the transition table, the actor's rights
/// and, for approvals, the balance as it stands now.
///
/// The balance is re-read here rather than trusted from submission time:
/// other approvals may have spent the tokens since.
pub fn validate_transition(
    state: &State,
    actor: &str,
    booking_id: &str,
    target: BookingStatus,
    policy: &BookingPolicy,
) -> Result<LedgerEffect> {
    let booking = state
        .booking(booking_id)
        .ok_or_else(|| TransitionError::BookingNotFound(booking_id.to_string()))?;

    let effect = booking
        .status
        .transition_effect(target)
        .ok_or(TransitionError::InvalidTransition {
            current: booking.status,
            requested: target,
        })?;

    let not_permitted = || TransitionError::NotPermitted {
        actor: actor.to_string(),
        current: booking.status,
        requested: target,
    };
    let acting = state.get_user(actor)?.ok_or_else(not_permitted)?;
    let is_owner = acting.id == booking.user_id;
    let permitted = match (booking.status, target) {
        (BookingStatus::Pending, BookingStatus::Cancelled) => acting.is_admin() || is_owner,
        (BookingStatus::Approved, BookingStatus::Cancelled) => {
            acting.is_admin() || (is_owner && policy.owner_may_cancel_approved)
        }
        _ => acting.is_admin(),
    };
    if !permitted {
        return Err(not_permitted().into());
    }

    if effect == LedgerEffect::Charge {
        let owner = lookup_user(state, &booking.user_id)?;
        let available = ledger::remaining_tokens(owner, state.bookings.values());
        if ledger::to_signed(booking.tokens_consumed) > available {
            return Err(ValidationError::InsufficientTokens {
                required: booking.tokens_consumed,
                available,
            }
            .into());
        }
    }

    Ok(effect)
}

/// The very first user may register themselves, provided they are an admin.
pub fn validate_register_user(state: &State, cmd: &Command) -> Result<()> {
    let CommandKind::RegisterUser {
        user_id,
        name,
        role,
        tokens_given,
    } = &cmd.kind
    else {
        return Err(Error::InvalidCommand("Expected RegisterUser command".to_string()));
    };

    check_token_bound(*tokens_given, "Initial allocation")?;
    let bootstrap = state.users.is_empty() && role.is_admin() && cmd.actor == *user_id;
    if !bootstrap {
        require_admin(state, &cmd.actor, "register users")?;
    }
    if user_id.trim().is_empty() {
        return Err(ValidationError::MissingField("user_id").into());
    }
    if name.trim().is_empty() {
        return Err(ValidationError::MissingField("name").into());
    }
    if state.get_user(user_id)?.is_some() {
        return Err(ValidationError::DuplicateUser(user_id.clone()).into());
    }
    Ok(())
}

pub fn validate_register_machine(state: &State, cmd: &Command) -> Result<()> {
    let CommandKind::RegisterMachine {
        machine_id,
        name,
        machine_type: _,
        token_cost_per_hour,
    } = &cmd.kind
    else {
        return Err(Error::InvalidCommand("Expected RegisterMachine command".to_string()));
    };

    require_admin(state, &cmd.actor, "register machines")?;
    if machine_id.trim().is_empty() {
        return Err(ValidationError::MissingField("machine_id").into());
    }
    if name.trim().is_empty() {
        return Err(ValidationError::MissingField("name").into());
    }
    if *token_cost_per_hour == Some(0) {
        return Err(ValidationError::InvalidAmount(
            "Token cost per hour must be greater than zero".to_string(),
        )
        .into());
    }
    if state.get_machine(machine_id)?.is_some() {
        return Err(ValidationError::DuplicateMachine(machine_id.clone()).into());
    }
    Ok(())
}

pub fn validate_set_machine_status(state: &State, cmd: &Command) -> Result<()> {
    let CommandKind::SetMachineStatus { machine_id, .. } = &cmd.kind else {
        return Err(Error::InvalidCommand("Expected SetMachineStatus command".to_string()));
    };

    require_admin(state, &cmd.actor, "change machine status")?;
    if state.get_machine(machine_id)?.is_none() {
        return Err(ValidationError::MachineNotFound(machine_id.clone()).into());
    }
    Ok(())
}

/// Allocation, adjustment and expiry share the admin/user/description checks;
/// the amount rules differ per kind.
pub fn validate_token_change(state: &State, cmd: &Command) -> Result<()> {
    let (user_id, description, action) = match &cmd.kind {
        CommandKind::AllocateTokens {
            user_id,
            description,
            ..
        } => (user_id, description, "allocate tokens"),
        CommandKind::AdjustTokens {
            user_id,
            description,
            ..
        } => (user_id, description, "adjust tokens"),
        CommandKind::ExpireTokens {
            user_id,
            description,
            ..
        } => (user_id, description, "expire tokens"),
        _ => return Err(Error::InvalidCommand("Expected a token command".to_string())),
    };

    require_admin(state, &cmd.actor, action)?;
    let user = lookup_user(state, user_id)?;
    require_description(description)?;
    let remaining = ledger::remaining_tokens(user, state.bookings.values());

    // Amount needed to take away from the allocation, if any.
    let removal = match &cmd.kind {
        CommandKind::AllocateTokens { amount, .. } => {
            if *amount == 0 {
                return Err(ValidationError::InvalidAmount(
                    "Allocation must be greater than zero".to_string(),
                )
                .into());
            }
            check_token_bound(*amount, "Allocation")?;
            check_allocation_headroom(user.tokens_given, *amount)?;
            None
        }
        CommandKind::AdjustTokens { amount, .. } => {
            if *amount == 0 {
                return Err(ValidationError::InvalidAmount(
                    "Adjustment must be non-zero".to_string(),
                )
                .into());
            }
            if *amount > 0 {
                check_allocation_headroom(user.tokens_given, amount.unsigned_abs())?;
            }
            (*amount < 0).then(|| amount.unsigned_abs())
        }
        CommandKind::ExpireTokens { amount, .. } => {
            if *amount == 0 {
                return Err(ValidationError::InvalidAmount(
                    "Expiry must be greater than zero".to_string(),
                )
                .into());
            }
            check_token_bound(*amount, "Expiry")?;
            Some(*amount)
        }
        _ => None,
    };

    if let Some(removal) = removal {
        if ledger::to_signed(removal) > remaining {
            return Err(ValidationError::InsufficientTokens {
                required: removal,
                available: remaining,
            }
            .into());
        }
    }
    Ok(())
}

fn check_allocation_headroom(given: u64, amount: u64) -> Result<()> {
    match given.checked_add(amount) {
        Some(total) if total <= MAX_TOKENS => Ok(()),
        _ => Err(ValidationError::InvalidAmount(format!(
            "Allocation of {} on top of {} exceeds the maximum of {}",
            amount, given, MAX_TOKENS
        ))
        .into()),
    }
}

/// Validate a command against the current state without changing it.
pub fn validate(state: &State, cmd: &Command, ctx: &ValidationContext) -> Result<()> {
    match &cmd.kind {
        CommandKind::RegisterUser { .. } => validate_register_user(state, cmd),
        CommandKind::RegisterMachine { .. } => validate_register_machine(state, cmd),
        CommandKind::SetMachineStatus { .. } => validate_set_machine_status(state, cmd),
        CommandKind::AllocateTokens { .. }
        | CommandKind::AdjustTokens { .. }
        | CommandKind::ExpireTokens { .. } => validate_token_change(state, cmd),
        CommandKind::SubmitBooking(_) => validate_submit_booking(state, cmd, ctx).map(|_| ()),
        CommandKind::TransitionBooking { booking_id, target } => {
            validate_transition(state, &cmd.actor, booking_id, *target, &ctx.policy).map(|_| ())
        }
    }
}
