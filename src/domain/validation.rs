use crate::domain::order::Order;
use crate::domain::procedure::Procedure;

// ============================================================================
// Validation Predicates
// ============================================================================
//
// Consistency rules an outer layer evaluates before persisting an order.
// Nothing in the domain enforces these inline.
//
// ============================================================================

/// Named boolean check over `T`. `true` means the rule holds.
pub struct ValidationRule<T> {
    pub name: &'static str,
    pub predicate: fn(&T) -> bool,
}

impl<T> ValidationRule<T> {
    pub const fn new(name: &'static str, predicate: fn(&T) -> bool) -> Self {
        Self { name, predicate }
    }

    pub fn holds(&self, item: &T) -> bool {
        (self.predicate)(item)
    }
}

pub fn order_rules() -> Vec<ValidationRule<Order>> {
    vec![
        ValidationRule::new(
            "visit_and_performing_facilities_share_information_authority",
            visit_and_performing_facilities_share_information_authority,
        ),
        ValidationRule::new(
            "non_defunct_procedures_share_performing_facility",
            non_defunct_procedures_share_performing_facility,
        ),
        ValidationRule::new(
            "non_defunct_procedures_share_performing_department",
            non_defunct_procedures_share_performing_department,
        ),
    ]
}

/// Names of the rules `item` breaks, in rule order.
pub fn validate<T>(item: &T, rules: &[ValidationRule<T>]) -> Vec<&'static str> {
    let broken: Vec<&'static str> = rules.iter().filter(|r| !r.holds(item)).map(|r| r.name).collect();
    if !broken.is_empty() {
        tracing::debug!(rules = ?broken, "validation rules broken");
    }
    broken
}

fn active_procedures(order: &Order) -> impl Iterator<Item = &Procedure> {
    order.procedures().iter().filter(|p| !p.is_defunct())
}

fn visit_and_performing_facilities_share_information_authority(order: &Order) -> bool {
    let Some(visit) = &order.visit else {
        return true;
    };
    active_procedures(order).all(|p| p.performing_facility.information_authority == visit.information_authority)
}

fn non_defunct_procedures_share_performing_facility(order: &Order) -> bool {
    all_equal(active_procedures(order).map(|p| &p.performing_facility.code))
}

fn non_defunct_procedures_share_performing_department(order: &Order) -> bool {
    all_equal(active_procedures(order).map(|p| &p.performing_department))
}

fn all_equal<T: PartialEq>(mut items: impl Iterator<Item = T>) -> bool {
    match items.next() {
        Some(first) => items.all(|item| item == first),
        None => true,
    }
}
