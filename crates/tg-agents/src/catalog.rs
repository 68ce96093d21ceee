//! Canned task templates per capability kind, used by the simulated
//! generation model to give proposed tasks realistic titles and hints.

use tg_core::types::{TaskKind, TaskPriority};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTemplate {
    pub title: &'static str,
    pub description: &'static str,
    pub recommendation: &'static str,
    pub priority: TaskPriority,
}

const MAINTENANCE: &[TaskTemplate] = &[
    TaskTemplate {
        title: "Schedule preventive maintenance",
        description: "Mileage and service history indicate the next interval is due within two weeks.",
        recommendation: "Offer the earliest open bay slot and bundle the pending recall check.",
        priority: TaskPriority::Medium,
    },
    TaskTemplate {
        title: "Reschedule overlapping service appointments",
        description: "Two appointments share a technician and lift in the same window.",
        recommendation: "Move the shorter job to the adjacent free slot.",
        priority: TaskPriority::High,
    },
    TaskTemplate {
        title: "Book follow-up inspection",
        description: "Last visit flagged brake wear close to the replacement limit.",
        recommendation: "Propose an inspection within 30 days.",
        priority: TaskPriority::Low,
    },
];

const PARTS: &[TaskTemplate] = &[
    TaskTemplate {
        title: "Reorder fast-moving parts",
        description: "Projected demand exceeds on-hand stock for filters and brake pads.",
        recommendation: "Order from the primary supplier with standard lead time.",
        priority: TaskPriority::Medium,
    },
    TaskTemplate {
        title: "Expedite back-ordered part",
        description: "A customer vehicle is waiting on a single back-ordered component.",
        recommendation: "Source from the secondary distributor despite the surcharge.",
        priority: TaskPriority::Urgent,
    },
];

const CLAIMS: &[TaskTemplate] = &[
    TaskTemplate {
        title: "Validate warranty claim",
        description: "Repair order matches a covered component within the warranty period.",
        recommendation: "Submit the claim with the diagnostic report attached.",
        priority: TaskPriority::High,
    },
    TaskTemplate {
        title: "Flag claim for missing documentation",
        description: "Claim lacks the technician sign-off required by the manufacturer.",
        recommendation: "Request the sign-off before submission.",
        priority: TaskPriority::Medium,
    },
];

const COMMUNICATION: &[TaskTemplate] = &[
    TaskTemplate {
        title: "Send service reminder",
        description: "Customer has not responded to the first maintenance reminder.",
        recommendation: "Follow up by SMS with two suggested appointment times.",
        priority: TaskPriority::Low,
    },
    TaskTemplate {
        title: "Notify customer of repair delay",
        description: "Estimated completion slipped past the promised pickup time.",
        recommendation: "Call the customer and offer a courtesy vehicle.",
        priority: TaskPriority::High,
    },
];

const INVENTORY: &[TaskTemplate] = &[
    TaskTemplate {
        title: "Rebalance stock between locations",
        description: "One location holds surplus tyres while another is below its safety level.",
        recommendation: "Transfer half of the surplus on the next scheduled run.",
        priority: TaskPriority::Medium,
    },
    TaskTemplate {
        title: "Write off obsolete inventory",
        description: "Items with no movement in 18 months are tying up shelf space.",
        recommendation: "Return eligible items to the supplier, write off the rest.",
        priority: TaskPriority::Low,
    },
];

/// Templates for a kind. Never empty.
pub fn templates_for(kind: TaskKind) -> &'static [TaskTemplate] {
    match kind {
        TaskKind::MaintenanceScheduling => MAINTENANCE,
        TaskKind::PartsOrdering => PARTS,
        TaskKind::ClaimProcessing => CLAIMS,
        TaskKind::CustomerCommunication => COMMUNICATION,
        TaskKind::InventoryManagement => INVENTORY,
    }
}
