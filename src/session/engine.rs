//! Pure settlement computation: weighted charge distribution, net balances
//! including already-registered repayments, and greedy minimum-transfer
//! matching. No I/O here; the service feeds it snapshots and persists the
//! result.

use std::collections::HashMap;

use super::models::{Expenditure, Member, Transfer};

const EPSILON: f64 = 1e-9;

/// Compute the replacement task list for an event.
///
/// `expenditures` carries each expenditure with its beneficiary set; an empty
/// set means "all current members". `repayments` is the per-ordered-pair sum
/// of recorded task payments.
pub fn compute_settlement(
    members: &[Member],
    expenditures: &[(Expenditure, Vec<String>)],
    repayments: &[Transfer],
) -> Vec<Transfer> {
    min_transfer_tasks(&net_balances(members, expenditures, repayments))
}

/// Net balance per member: positive means the member should receive,
/// negative means they should pay.
pub fn net_balances(
    members: &[Member],
    expenditures: &[(Expenditure, Vec<String>)],
    repayments: &[Transfer],
) -> HashMap<String, f64> {
    let charges = charge_distribution(members, expenditures);
    let mut paid: HashMap<&str, f64> = HashMap::new();
    for (exp, _) in expenditures {
        *paid.entry(exp.payer_id.as_str()).or_insert(0.0) += exp.amount as f64;
    }

    let mut balance: HashMap<String, f64> = members
        .iter()
        .map(|m| {
            let net = paid.get(m.user_id.as_str()).copied().unwrap_or(0.0)
                - charges.get(m.user_id.as_str()).copied().unwrap_or(0.0);
            (m.user_id.clone(), net)
        })
        .collect();

    // A recorded repayment reduces the net obligation without touching the
    // original distribution: payer recovers, payee owes the pair less.
    for r in repayments {
        if let Some(b) = balance.get_mut(&r.payer_id) {
            *b += r.amount as f64;
        }
        if let Some(b) = balance.get_mut(&r.payee_id) {
            *b -= r.amount as f64;
        }
    }

    balance
}

/// Distribute each expenditure over its beneficiary set in proportion to
/// member weights. Expenditures whose beneficiary weights sum to zero are
/// unassignable and skipped.
fn charge_distribution(
    members: &[Member],
    expenditures: &[(Expenditure, Vec<String>)],
) -> HashMap<String, f64> {
    let weights: HashMap<&str, f64> = members
        .iter()
        .map(|m| (m.user_id.as_str(), m.weight))
        .collect();

    let mut charges: HashMap<String, f64> = HashMap::new();
    for (exp, beneficiaries) in expenditures {
        let targets: Vec<&str> = if beneficiaries.is_empty() {
            members.iter().map(|m| m.user_id.as_str()).collect()
        } else {
            beneficiaries.iter().map(String::as_str).collect()
        };

        let weight_sum: f64 = targets
            .iter()
            .map(|uid| weights.get(uid).copied().unwrap_or(0.0))
            .sum();
        if weight_sum == 0.0 {
            continue;
        }

        for uid in targets {
            let w = weights.get(uid).copied().unwrap_or(0.0);
            *charges.entry(uid.to_string()).or_insert(0.0) += exp.amount as f64 * (w / weight_sum);
        }
    }
    charges
}

/// Greedy matching: repeatedly pair the largest creditor with the largest
/// debtor, emitting the rounded overlap. Zero-amount tasks are dropped. This
/// heuristic does not guarantee the provably minimal transfer count in
/// pathological cases.
pub fn min_transfer_tasks(balances: &HashMap<String, f64>) -> Vec<Transfer> {
    let mut creditors: Vec<(String, f64)> = Vec::new();
    let mut debtors: Vec<(String, f64)> = Vec::new();
    for (uid, net) in balances {
        if *net > 0.0 {
            creditors.push((uid.clone(), *net));
        } else if *net < 0.0 {
            debtors.push((uid.clone(), -net));
        }
    }
    // Sort by magnitude, user id as tie-breaker for deterministic output.
    creditors.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    debtors.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut tasks = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < creditors.len() && j < debtors.len() {
        let overlap = creditors[i].1.min(debtors[j].1);
        let amount = overlap.round() as i64;
        if amount > 0 {
            tasks.push(Transfer {
                payer_id: debtors[j].0.clone(),
                payee_id: creditors[i].0.clone(),
                amount,
            });
        }
        creditors[i].1 -= overlap;
        debtors[j].1 -= overlap;
        if creditors[i].1 <= EPSILON {
            i += 1;
        }
        if debtors[j].1 <= EPSILON {
            j += 1;
        }
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(user_id: &str, weight: f64) -> Member {
        Member {
            event_id: 1,
            user_id: user_id.to_string(),
            weight,
        }
    }

    fn expenditure(payer_id: &str, amount: i64, beneficiaries: &[&str]) -> (Expenditure, Vec<String>) {
        (
            Expenditure {
                id: 0,
                event_id: 1,
                payer_id: payer_id.to_string(),
                amount,
                memo: String::new(),
            },
            beneficiaries.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn outgoing_total(tasks: &[Transfer]) -> i64 {
        tasks.iter().map(|t| t.amount).sum()
    }

    #[test]
    fn even_split_charges_each_debtor_equally() {
        let members = vec![member("a", 1.0), member("b", 1.0), member("c", 1.0)];
        let expenditures = vec![expenditure("a", 3000, &[])];

        let tasks = compute_settlement(&members, &expenditures, &[]);

        assert_eq!(outgoing_total(&tasks), 2000);
        for t in &tasks {
            assert_eq!(t.payee_id, "a");
            assert_eq!(t.amount, 1000);
        }
    }

    #[test]
    fn weighted_split_follows_weights() {
        let members = vec![member("a", 2.0), member("b", 1.0), member("c", 1.0)];
        let expenditures = vec![expenditure("a", 4000, &[])];

        let balances = net_balances(&members, &expenditures, &[]);
        assert_eq!(balances["a"], 2000.0);
        assert_eq!(balances["b"], -1000.0);
        assert_eq!(balances["c"], -1000.0);

        let tasks = min_transfer_tasks(&balances);
        assert_eq!(outgoing_total(&tasks), 2000);
        assert!(tasks.iter().all(|t| t.payee_id == "a"));
    }

    #[test]
    fn targeted_beneficiary_carries_the_full_charge() {
        let members = vec![member("a", 1.0), member("b", 1.0)];
        let expenditures = vec![expenditure("a", 2000, &["b"])];

        let tasks = compute_settlement(&members, &expenditures, &[]);

        assert_eq!(
            tasks,
            vec![Transfer {
                payer_id: "b".to_string(),
                payee_id: "a".to_string(),
                amount: 2000,
            }]
        );
    }

    #[test]
    fn prior_repayment_reduces_the_pair() {
        let members = vec![member("a", 1.0), member("b", 1.0)];
        let expenditures = vec![expenditure("a", 2000, &["b"])];
        let repayments = vec![Transfer {
            payer_id: "b".to_string(),
            payee_id: "a".to_string(),
            amount: 500,
        }];

        let tasks = compute_settlement(&members, &expenditures, &repayments);

        assert_eq!(
            tasks,
            vec![Transfer {
                payer_id: "b".to_string(),
                payee_id: "a".to_string(),
                amount: 1500,
            }]
        );
    }

    #[test]
    fn zero_weight_beneficiary_set_is_skipped() {
        let members = vec![member("a", 1.0), member("b", 0.0)];
        let expenditures = vec![expenditure("a", 1000, &["b"])];

        let tasks = compute_settlement(&members, &expenditures, &[]);
        assert!(tasks.is_empty());
    }

    #[test]
    fn settled_up_group_needs_no_transfers() {
        let members = vec![member("a", 1.0), member("b", 1.0)];
        let expenditures = vec![expenditure("a", 1000, &[]), expenditure("b", 1000, &[])];

        let tasks = compute_settlement(&members, &expenditures, &[]);
        assert!(tasks.is_empty());
    }

    #[test]
    fn negative_expenditure_acts_as_a_correction() {
        let members = vec![member("a", 1.0), member("b", 1.0)];
        let expenditures = vec![expenditure("a", 3000, &[]), expenditure("a", -1000, &[])];

        let tasks = compute_settlement(&members, &expenditures, &[]);
        assert_eq!(
            tasks,
            vec![Transfer {
                payer_id: "b".to_string(),
                payee_id: "a".to_string(),
                amount: 1000,
            }]
        );
    }

    #[test]
    fn raising_a_weight_never_lowers_that_charge() {
        let expenditures = vec![expenditure("a", 3000, &[])];
        let before = net_balances(
            &[member("a", 1.0), member("b", 1.0), member("c", 1.0)],
            &expenditures,
            &[],
        );
        let after = net_balances(
            &[member("a", 1.0), member("b", 2.0), member("c", 1.0)],
            &expenditures,
            &[],
        );
        // b's balance is -charge; a bigger weight means a bigger charge.
        assert!(after["b"] <= before["b"]);
    }

    #[test]
    fn sub_half_yen_residuals_round_away() {
        let members = vec![member("a", 1.0), member("b", 1.0), member("c", 1.0)];
        let expenditures = vec![expenditure("a", 100, &[])];

        // Each debtor owes 33.33…, rounded to 33 per emitted task.
        let tasks = compute_settlement(&members, &expenditures, &[]);
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.amount == 33));
    }

    #[test]
    fn excess_repayment_flips_the_direction() {
        let members = vec![member("a", 1.0), member("b", 1.0)];
        let expenditures = vec![expenditure("a", 2000, &["b"])];
        let repayments = vec![Transfer {
            payer_id: "b".to_string(),
            payee_id: "a".to_string(),
            amount: 2500,
        }];

        let tasks = compute_settlement(&members, &expenditures, &repayments);
        assert_eq!(
            tasks,
            vec![Transfer {
                payer_id: "a".to_string(),
                payee_id: "b".to_string(),
                amount: 500,
            }]
        );
    }
}
