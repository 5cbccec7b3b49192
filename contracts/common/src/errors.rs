use soroban_sdk::contracterror;

/// Every failure a Tidepool engine can report.
///
/// Codes are grouped by concern and must never be renumbered: creation 1-9,
/// lookup 10-19, authorization 20-29, accounting 30-39, swap 40-49,
/// bridge and hooks 50-59.
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    // Creation
    InvalidStartTime = 1,
    InvalidEndTime = 2,
    InvalidStart = 3,
    InvalidAddressZero = 4,
    InvalidAddressSelf = 5,
    InvalidAddressSender = 6,
    InvalidStepSetting = 7,

    // Lookup
    InvalidStream = 10,
    InvalidVest = 11,

    // Authorization
    NotSenderOrRecipient = 20,
    NotSender = 21,
    NotRecipient = 22,
    NotVestReceiver = 23,
    NotOwner = 24,
    NotPendingOwner = 25,
    NotClaimHolder = 26,

    // Accounting
    InvalidWithdrawTooMuch = 30,
    InvalidAmount = 31,

    // Swap
    InvalidSwapper = 40,
    ReceivedTooLess = 41,

    // Approval bridge and automation hooks
    ApprovalRejected = 50,
    TaskFailed = 51,
}
