//! Phase and subphase model for the recruitment pipeline.
//!
//! This module provides:
//! - `Phase` — the coarse stage ordinal (entry through decline)
//! - `Subphase` — the fine-grained status within a stage
//! - `PhaseFamily` — the handler family a phase belongs to
//! - `PhaseState` — a validated (phase, subphase) pair
//!
//! Subphase meaning is family-dependent; a handful of values are reserved
//! markers the transition engine branches on (closing markers, the decline
//! continuation marker, and the auto-generated skip/reschedule markers).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse pipeline stage, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Entry,
    DocumentScreening,
    Round1,
    Round2,
    Round3,
    Round4,
    Round5,
    FinalRound,
    OfferHold,
    OfferAccept,
    Decline,
}

impl Phase {
    /// Stable ordinal code used by the backing store.
    pub fn code(&self) -> i64 {
        match self {
            Self::Entry => 1,
            Self::DocumentScreening => 2,
            Self::Round1 => 3,
            Self::Round2 => 4,
            Self::Round3 => 5,
            Self::Round4 => 6,
            Self::Round5 => 7,
            Self::FinalRound => 8,
            Self::OfferHold => 9,
            Self::OfferAccept => 10,
            Self::Decline => 11,
        }
    }

    /// Inverse of [`Phase::code`].
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Entry),
            2 => Some(Self::DocumentScreening),
            3 => Some(Self::Round1),
            4 => Some(Self::Round2),
            5 => Some(Self::Round3),
            6 => Some(Self::Round4),
            7 => Some(Self::Round5),
            8 => Some(Self::FinalRound),
            9 => Some(Self::OfferHold),
            10 => Some(Self::OfferAccept),
            11 => Some(Self::Decline),
            _ => None,
        }
    }

    /// Human-readable label used in batch error messages and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::DocumentScreening => "document screening",
            Self::Round1 => "first round",
            Self::Round2 => "second round",
            Self::Round3 => "third round",
            Self::Round4 => "fourth round",
            Self::Round5 => "fifth round",
            Self::FinalRound => "final round",
            Self::OfferHold => "offer hold",
            Self::OfferAccept => "offer accept",
            Self::Decline => "decline",
        }
    }

    /// The handler family this phase belongs to.
    pub fn family(&self) -> PhaseFamily {
        match self {
            Self::Entry => PhaseFamily::Entry,
            Self::DocumentScreening => PhaseFamily::Document,
            Self::Round1
            | Self::Round2
            | Self::Round3
            | Self::Round4
            | Self::Round5
            | Self::FinalRound => PhaseFamily::Selection,
            Self::OfferHold => PhaseFamily::OfferHold,
            Self::OfferAccept => PhaseFamily::OfferAccept,
            Self::Decline => PhaseFamily::Decline,
        }
    }

    /// The next stage in pipeline order, if any.
    ///
    /// Used to compute the skipped phase for a `SkipSelection` transition.
    pub fn next(&self) -> Option<Phase> {
        Self::from_code(self.code() + 1)
    }

    /// True for interview selection rounds (round 1 through final).
    pub fn is_selection(&self) -> bool {
        self.family() == PhaseFamily::Selection
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Handler family: each family has one `advance_*` entry point on the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseFamily {
    Entry,
    Document,
    Selection,
    OfferHold,
    OfferAccept,
    Decline,
}

impl PhaseFamily {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Document => "document screening",
            Self::Selection => "selection",
            Self::OfferHold => "offer hold",
            Self::OfferAccept => "offer accept",
            Self::Decline => "decline",
        }
    }
}

impl fmt::Display for PhaseFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Fine-grained status within a phase.
///
/// Codes are grouped by family (1x entry, 2x document, 3x/4x selection,
/// 5x offer-hold, 6x offer-accept, 7x decline); `CollectResult` is shared
/// between the document and selection families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subphase {
    // Entry
    SoundOut,
    ConfirmIntent,
    RequestDocuments,
    EntryHeld,
    EntryClosed,
    // Document screening
    PrepareDocuments,
    SubmitDocuments,
    ScreeningFailed,
    DocumentClosed,
    // Selection rounds
    CandidateSupport,
    CollectAvailability,
    ConfirmSchedule,
    DayOfDetails,
    CollectResult,
    RequestGuidance,
    RequestRecommendation,
    SkipMarker,
    RescheduleMarker,
    SelectionFailed,
    SelectionClosed,
    // Offer hold
    OfferApproval,
    ConditionsReview,
    OfferHeldClosed,
    // Offer accept
    Accepted,
    AcceptanceWithdrawn,
    // Decline
    Declined,
    ContinuePrevious,
    DeclineClosed,
}

impl Subphase {
    /// Stable ordinal code used by the backing store.
    pub fn code(&self) -> i64 {
        match self {
            Self::SoundOut => 10,
            Self::ConfirmIntent => 11,
            Self::RequestDocuments => 12,
            Self::EntryHeld => 13,
            Self::EntryClosed => 19,
            Self::PrepareDocuments => 20,
            Self::SubmitDocuments => 21,
            Self::ScreeningFailed => 28,
            Self::DocumentClosed => 29,
            Self::CandidateSupport => 30,
            Self::CollectAvailability => 31,
            Self::ConfirmSchedule => 32,
            Self::DayOfDetails => 33,
            Self::CollectResult => 34,
            Self::RequestGuidance => 35,
            Self::RequestRecommendation => 36,
            Self::SkipMarker => 37,
            Self::RescheduleMarker => 38,
            Self::SelectionFailed => 48,
            Self::SelectionClosed => 49,
            Self::OfferApproval => 50,
            Self::ConditionsReview => 51,
            Self::OfferHeldClosed => 59,
            Self::Accepted => 60,
            Self::AcceptanceWithdrawn => 69,
            Self::Declined => 70,
            Self::ContinuePrevious => 71,
            Self::DeclineClosed => 79,
        }
    }

    /// Inverse of [`Subphase::code`].
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            10 => Some(Self::SoundOut),
            11 => Some(Self::ConfirmIntent),
            12 => Some(Self::RequestDocuments),
            13 => Some(Self::EntryHeld),
            19 => Some(Self::EntryClosed),
            20 => Some(Self::PrepareDocuments),
            21 => Some(Self::SubmitDocuments),
            28 => Some(Self::ScreeningFailed),
            29 => Some(Self::DocumentClosed),
            30 => Some(Self::CandidateSupport),
            31 => Some(Self::CollectAvailability),
            32 => Some(Self::ConfirmSchedule),
            33 => Some(Self::DayOfDetails),
            34 => Some(Self::CollectResult),
            35 => Some(Self::RequestGuidance),
            36 => Some(Self::RequestRecommendation),
            37 => Some(Self::SkipMarker),
            38 => Some(Self::RescheduleMarker),
            48 => Some(Self::SelectionFailed),
            49 => Some(Self::SelectionClosed),
            50 => Some(Self::OfferApproval),
            51 => Some(Self::ConditionsReview),
            59 => Some(Self::OfferHeldClosed),
            60 => Some(Self::Accepted),
            69 => Some(Self::AcceptanceWithdrawn),
            70 => Some(Self::Declined),
            71 => Some(Self::ContinuePrevious),
            79 => Some(Self::DeclineClosed),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::SoundOut => "sound out posting",
            Self::ConfirmIntent => "confirm application intent",
            Self::RequestDocuments => "request document stage",
            Self::EntryHeld => "hold entry",
            Self::EntryClosed => "entry closed",
            Self::PrepareDocuments => "prepare documents",
            Self::SubmitDocuments => "submit documents",
            Self::ScreeningFailed => "screening failed",
            Self::DocumentClosed => "document screening closed",
            Self::CandidateSupport => "candidate support",
            Self::CollectAvailability => "collect availability",
            Self::ConfirmSchedule => "confirm schedule",
            Self::DayOfDetails => "day-of details",
            Self::CollectResult => "collect result",
            Self::RequestGuidance => "request guidance",
            Self::RequestRecommendation => "request recommendation",
            Self::SkipMarker => "round skipped",
            Self::RescheduleMarker => "rescheduled",
            Self::SelectionFailed => "selection failed",
            Self::SelectionClosed => "selection closed",
            Self::OfferApproval => "offer approval",
            Self::ConditionsReview => "conditions review",
            Self::OfferHeldClosed => "offer hold closed",
            Self::Accepted => "offer accepted",
            Self::AcceptanceWithdrawn => "acceptance withdrawn",
            Self::Declined => "declined",
            Self::ContinuePrevious => "continue previous round",
            Self::DeclineClosed => "decline closed",
        }
    }

    /// Reserved closing markers that terminate the pipeline.
    pub fn is_closing(&self) -> bool {
        matches!(
            self,
            Self::EntryClosed
                | Self::ScreeningFailed
                | Self::DocumentClosed
                | Self::SelectionFailed
                | Self::SelectionClosed
                | Self::OfferHeldClosed
                | Self::AcceptanceWithdrawn
                | Self::DeclineClosed
        )
    }

    /// Subphases valid for the given family.
    pub fn valid_for(&self, family: PhaseFamily) -> bool {
        // The continuation marker names the target phase of the round to
        // resume, which can be any family; the engine resolves it before a
        // task is stored.
        if matches!(self, Self::ContinuePrevious) {
            return true;
        }
        match family {
            PhaseFamily::Entry => matches!(
                self,
                Self::SoundOut
                    | Self::ConfirmIntent
                    | Self::RequestDocuments
                    | Self::EntryHeld
                    | Self::EntryClosed
            ),
            PhaseFamily::Document => matches!(
                self,
                Self::PrepareDocuments
                    | Self::SubmitDocuments
                    | Self::CollectResult
                    | Self::ScreeningFailed
                    | Self::DocumentClosed
            ),
            PhaseFamily::Selection => matches!(
                self,
                Self::CandidateSupport
                    | Self::CollectAvailability
                    | Self::ConfirmSchedule
                    | Self::DayOfDetails
                    | Self::CollectResult
                    | Self::RequestGuidance
                    | Self::RequestRecommendation
                    | Self::SkipMarker
                    | Self::RescheduleMarker
                    | Self::SelectionFailed
                    | Self::SelectionClosed
            ),
            PhaseFamily::OfferHold => matches!(
                self,
                Self::OfferApproval | Self::ConditionsReview | Self::OfferHeldClosed
            ),
            PhaseFamily::OfferAccept => {
                matches!(self, Self::Accepted | Self::AcceptanceWithdrawn)
            }
            PhaseFamily::Decline => matches!(
                self,
                Self::Declined | Self::ContinuePrevious | Self::DeclineClosed
            ),
        }
    }
}

impl fmt::Display for Subphase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A validated (phase, subphase) pair.
///
/// Construction via [`PhaseState::new`] rejects pairs whose subphase does not
/// belong to the phase's family, so every `PhaseState` in the system is a
/// state the pipeline can actually be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhaseState {
    pub phase: Phase,
    pub subphase: Subphase,
}

impl PhaseState {
    pub fn new(phase: Phase, subphase: Subphase) -> Result<Self, InvalidPhaseState> {
        if subphase.valid_for(phase.family()) {
            Ok(Self { phase, subphase })
        } else {
            Err(InvalidPhaseState::BadPair { phase, subphase })
        }
    }

    /// Construct from store ordinal codes.
    pub fn from_codes(phase: i64, subphase: i64) -> Result<Self, InvalidPhaseState> {
        let p = Phase::from_code(phase).ok_or(InvalidPhaseState::UnknownPhase(phase))?;
        let s =
            Subphase::from_code(subphase).ok_or(InvalidPhaseState::UnknownSubphase(subphase))?;
        Self::new(p, s)
    }

    pub fn family(&self) -> PhaseFamily {
        self.phase.family()
    }

    pub fn is_closing(&self) -> bool {
        self.subphase.is_closing()
    }

    /// "second round / collect result" style label for logs and errors.
    pub fn label(&self) -> String {
        format!("{} / {}", self.phase.label(), self.subphase.label())
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.phase, self.subphase)
    }
}

/// Error for an unconstructible (phase, subphase) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidPhaseState {
    UnknownPhase(i64),
    UnknownSubphase(i64),
    BadPair { phase: Phase, subphase: Subphase },
}

impl fmt::Display for InvalidPhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPhase(code) => write!(f, "unknown phase code {}", code),
            Self::UnknownSubphase(code) => write!(f, "unknown subphase code {}", code),
            Self::BadPair { phase, subphase } => write!(
                f,
                "subphase '{}' is not valid for phase '{}'",
                subphase, phase
            ),
        }
    }
}

impl std::error::Error for InvalidPhaseState {}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entry" => Ok(Self::Entry),
            "document_screening" => Ok(Self::DocumentScreening),
            "round_1" => Ok(Self::Round1),
            "round_2" => Ok(Self::Round2),
            "round_3" => Ok(Self::Round3),
            "round_4" => Ok(Self::Round4),
            "round_5" => Ok(Self::Round5),
            "final_round" => Ok(Self::FinalRound),
            "offer_hold" => Ok(Self::OfferHold),
            "offer_accept" => Ok(Self::OfferAccept),
            "decline" => Ok(Self::Decline),
            _ => Err(format!("Invalid phase: {}", s)),
        }
    }
}
