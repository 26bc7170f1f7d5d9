use crate::error::{AssignError, StoreError};
use crate::repository::{StatusExtra, TransferFilter, TransferRecord, TransferRepository, TransferStatus};
use alloy_primitives::{Address, U256};
use rusqlite::Connection;
use serde::Serialize;
use std::str::FromStr;
use tracing::{info, warn};

/// Parameters of an "assign the next eligible transfer" request as they
/// arrive from the API layer, unvalidated.
#[derive(Debug, Clone)]
pub struct AssignmentRequest {
    pub mode: String,
    pub value: String,
    pub to_address: String,
    pub token_address: String,
    pub lottery_numbers: String,
    pub lottery_period: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub transaction_hash: String,
    pub from_address: String,
    pub lottery_numbers: String,
    pub lottery_period: u64,
    pub transfer: TransferRecord,
}

/// Guarded status transitions over the transfer table. Every write is a
/// single conditional UPDATE, so two callers racing for the same row see
/// exactly one winner.
pub struct LotteryAssigner<'a> {
    conn: &'a Connection,
}

impl<'a> LotteryAssigner<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn repository(&self) -> TransferRepository<'a> {
        TransferRepository::new(self.conn)
    }

    /// PENDING -> NUMBERS_ASSIGNED for the first pending row with this hash
    /// (see `TransferRepository::update_status`). `false` means nothing
    /// changed: the hash is unknown or already assigned.
    pub fn assign(
        &self,
        transaction_hash: &str,
        lottery_numbers: &str,
        lottery_period: u64,
    ) -> Result<bool, StoreError> {
        let extra = StatusExtra {
            lottery_numbers: Some(lottery_numbers.to_string()),
            lottery_period: Some(lottery_period),
        };
        let changed = self.repository().update_status(
            transaction_hash,
            TransferStatus::Pending,
            TransferStatus::NumbersAssigned,
            &extra,
        )?;

        if changed == 1 {
            info!(
                tx = %transaction_hash,
                period = lottery_period,
                "Lottery numbers assigned"
            );
        }
        Ok(changed == 1)
    }

    /// Picks the oldest unassigned transfer matching the request and
    /// assigns it.
    pub fn assign_next(&self, request: &AssignmentRequest) -> Result<Assignment, AssignError> {
        let filter = validate(request)?;
        let numbers = request.lottery_numbers.trim();

        let candidate = self
            .repository()
            .oldest_unassigned(&filter)?
            .ok_or(AssignError::NotFound)?;

        let extra = StatusExtra {
            lottery_numbers: Some(numbers.to_string()),
            lottery_period: Some(request.lottery_period),
        };
        let changed = self.repository().update_status_by_id(
            candidate.id,
            TransferStatus::Pending,
            TransferStatus::NumbersAssigned,
            &extra,
        )?;
        if changed != 1 {
            warn!(tx = %candidate.transaction_hash, "Transfer was assigned concurrently");
            return Err(AssignError::Conflict(candidate.transaction_hash));
        }

        let transfer = self
            .repository()
            .find_by_id(candidate.id)?
            .ok_or(AssignError::NotFound)?;
        info!(
            tx = %transfer.transaction_hash,
            log_index = transfer.log_index,
            period = request.lottery_period,
            "Lottery numbers assigned"
        );

        Ok(Assignment {
            transaction_hash: transfer.transaction_hash.clone(),
            from_address: transfer.from_address.clone(),
            lottery_numbers: numbers.to_string(),
            lottery_period: request.lottery_period,
            transfer,
        })
    }

    /// Moves a transfer along an allowed edge of the status graph, typically
    /// NUMBERS_ASSIGNED -> CLAIMED or FAILED.
    pub fn transition(
        &self,
        transaction_hash: &str,
        from: TransferStatus,
        to: TransferStatus,
    ) -> Result<(), AssignError> {
        if !from.can_transition_to(to) {
            return Err(AssignError::validation(
                "status",
                format!("cannot move from {from} to {to}"),
            ));
        }

        let repo = self.repository();
        let changed = repo.update_status(transaction_hash, from, to, &StatusExtra::default())?;
        if changed == 0 {
            return match repo.find_by_hash(transaction_hash)? {
                None => Err(AssignError::NotFound),
                Some(record) => Err(AssignError::Conflict(format!(
                    "{} is {}, expected {}",
                    record.transaction_hash, record.status, from
                ))),
            };
        }

        info!(tx = %transaction_hash, %from, %to, "Transfer status updated");
        Ok(())
    }
}

fn validate(request: &AssignmentRequest) -> Result<TransferFilter, AssignError> {
    if request.mode.trim().is_empty() {
        return Err(AssignError::validation("mode", "must not be empty"));
    }

    let value = request.value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AssignError::validation("value", "must be a non-negative integer"));
    }
    let value = U256::from_str(value)
        .map_err(|_| AssignError::validation("value", "out of range for a token amount"))?;

    Address::from_str(request.to_address.trim())
        .map_err(|_| AssignError::validation("toAddress", "invalid address"))?;
    Address::from_str(request.token_address.trim())
        .map_err(|_| AssignError::validation("tokenAddress", "invalid address"))?;

    if request.lottery_numbers.trim().is_empty() {
        return Err(AssignError::validation("lotteryNumbers", "must not be empty"));
    }

    Ok(TransferFilter::new(
        &request.mode,
        &value.to_string(),
        &request.to_address,
        &request.token_address,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{Database, NewTransfer};
    use alloy_primitives::B256;
    use std::sync::{Arc, Barrier};
    use std::thread;

    const TOKEN: &str = "0xA7ab21686D40Aa35Cb51137A795D84A57352F593";
    const RECIPIENT: &str = "0xbebaf2a9ad714feb9dd151d81dd6d61ae0535646";

    fn transfer(block: u64, seed: u8, value: u64) -> NewTransfer {
        NewTransfer {
            mode: "base".to_string(),
            block_number: block,
            transaction_hash: B256::repeat_byte(seed),
            log_index: 0,
            from_address: Address::repeat_byte(seed),
            to_address: Address::from_str(RECIPIENT).unwrap(),
            token_address: Address::from_str(TOKEN).unwrap(),
            token_symbol: "USDC".to_string(),
            value: U256::from(value),
            timestamp: 1_700_000_000 + block,
        }
    }

    fn hash(seed: u8) -> String {
        crate::repository::models::to_lower_hex(B256::repeat_byte(seed))
    }

    fn request(value: &str) -> AssignmentRequest {
        AssignmentRequest {
            mode: "base".to_string(),
            value: value.to_string(),
            to_address: RECIPIENT.to_string(),
            token_address: TOKEN.to_string(),
            lottery_numbers: "1,2,3,4,5,6".to_string(),
            lottery_period: 7,
        }
    }

    fn statuses(db: &Database) -> Vec<(String, u64, String, TransferStatus)> {
        let conn = db.conn().unwrap();
        let mut stmt = conn
            .prepare("SELECT mode, log_index, value, status FROM token_transfers ORDER BY id")
            .unwrap();
        stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .unwrap()
        .map(|row| {
            let (mode, log_index, value, status) = row.unwrap();
            (mode, log_index, value, status.parse().unwrap())
        })
        .collect()
    }

    fn seeded(transfers: &[NewTransfer]) -> Database {
        let db = Database::new(":memory:").unwrap();
        TransferRepository::new(db.conn().unwrap())
            .insert_batch(transfers)
            .unwrap();
        db
    }

    #[test]
    fn assign_only_succeeds_once() {
        let db = seeded(&[transfer(10, 1, 1_000_000)]);
        let assigner = LotteryAssigner::new(db.conn().unwrap());

        assert!(assigner.assign(&hash(1), "7,8,9", 3).unwrap());
        assert!(!assigner.assign(&hash(1), "1,1,1", 4).unwrap());
        assert!(!assigner.assign(&hash(2), "1,1,1", 4).unwrap());

        let record = TransferRepository::new(db.conn().unwrap())
            .find_by_hash(&hash(1))
            .unwrap()
            .unwrap();
        assert_eq!(record.status, TransferStatus::NumbersAssigned);
        assert_eq!(record.lottery_numbers.as_deref(), Some("7,8,9"));
        assert_eq!(record.lottery_period, Some(3));
    }

    #[test]
    fn assign_next_serves_oldest_block_first() {
        let db = seeded(&[
            transfer(30, 3, 1_000_000),
            transfer(10, 1, 1_000_000),
            transfer(20, 2, 2_000_000),
        ]);
        let assigner = LotteryAssigner::new(db.conn().unwrap());

        let first = assigner.assign_next(&request("1000000")).unwrap();
        assert_eq!(first.transaction_hash, hash(1));
        assert_eq!(first.transfer.status, TransferStatus::NumbersAssigned);
        assert_eq!(first.lottery_period, 7);

        let second = assigner.assign_next(&request("1000000")).unwrap();
        assert_eq!(second.transaction_hash, hash(3));

        assert!(matches!(
            assigner.assign_next(&request("1000000")),
            Err(AssignError::NotFound)
        ));
    }

    #[test]
    fn assign_next_updates_the_selected_log_of_a_transaction() {
        let mut second_log = transfer(10, 1, 200);
        second_log.log_index = 1;
        let db = seeded(&[transfer(10, 1, 100), second_log]);
        let assigner = LotteryAssigner::new(db.conn().unwrap());

        let assignment = assigner.assign_next(&request("200")).unwrap();
        assert_eq!(assignment.transfer.value, "200");
        assert_eq!(assignment.transfer.log_index, 1);
        assert_eq!(assignment.transfer.status, TransferStatus::NumbersAssigned);

        let rows = statuses(&db);
        assert_eq!(
            rows,
            vec![
                ("base".to_string(), 0, "100".to_string(), TransferStatus::Pending),
                ("base".to_string(), 1, "200".to_string(), TransferStatus::NumbersAssigned),
            ]
        );
    }

    #[test]
    fn assign_next_stays_within_the_requested_mode() {
        let mut flow = transfer(10, 1, 5);
        flow.mode = "flow".to_string();
        let db = seeded(&[transfer(10, 1, 5), flow]);
        let assigner = LotteryAssigner::new(db.conn().unwrap());

        let mut req = request("5");
        req.mode = "flow".to_string();
        let assignment = assigner.assign_next(&req).unwrap();
        assert_eq!(assignment.transfer.mode, "flow");

        let rows = statuses(&db);
        assert_eq!(rows[0].0, "base");
        assert_eq!(rows[0].3, TransferStatus::Pending);
        assert_eq!(rows[1].0, "flow");
        assert_eq!(rows[1].3, TransferStatus::NumbersAssigned);
    }

    #[test]
    fn assign_next_matches_addresses_case_insensitively() {
        let db = seeded(&[transfer(10, 1, 5)]);
        let assigner = LotteryAssigner::new(db.conn().unwrap());

        let mut req = request("5");
        req.to_address = RECIPIENT.to_uppercase().replacen("0X", "0x", 1);
        req.token_address = TOKEN.to_lowercase();
        assert_eq!(assigner.assign_next(&req).unwrap().transaction_hash, hash(1));
    }

    #[test]
    fn assign_next_rejects_malformed_requests() {
        let db = seeded(&[]);
        let assigner = LotteryAssigner::new(db.conn().unwrap());

        let cases = [
            ("value", request("12.5")),
            ("value", request("-1")),
            ("value", request("")),
            ("toAddress", AssignmentRequest {
                to_address: "0x1234".to_string(),
                ..request("1")
            }),
            ("tokenAddress", AssignmentRequest {
                token_address: "usdc".to_string(),
                ..request("1")
            }),
            ("lotteryNumbers", AssignmentRequest {
                lottery_numbers: "  ".to_string(),
                ..request("1")
            }),
            ("mode", AssignmentRequest {
                mode: String::new(),
                ..request("1")
            }),
        ];

        for (expected, req) in cases {
            match assigner.assign_next(&req) {
                Err(AssignError::Validation { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected validation error on {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn transitions_follow_the_status_graph() {
        let db = seeded(&[transfer(10, 1, 5), transfer(11, 2, 5)]);
        let assigner = LotteryAssigner::new(db.conn().unwrap());

        // not assigned yet
        assert!(matches!(
            assigner.transition(&hash(1), TransferStatus::NumbersAssigned, TransferStatus::Claimed),
            Err(AssignError::Conflict(_))
        ));
        // skipping a state
        assert!(matches!(
            assigner.transition(&hash(1), TransferStatus::Pending, TransferStatus::Claimed),
            Err(AssignError::Validation { field: "status", .. })
        ));

        assert!(assigner.assign(&hash(1), "1,2", 1).unwrap());
        assigner
            .transition(&hash(1), TransferStatus::NumbersAssigned, TransferStatus::Claimed)
            .unwrap();

        // terminal
        assert!(matches!(
            assigner.transition(&hash(1), TransferStatus::Claimed, TransferStatus::Failed),
            Err(AssignError::Validation { .. })
        ));
        assert!(matches!(
            assigner.transition(&hash(9), TransferStatus::NumbersAssigned, TransferStatus::Failed),
            Err(AssignError::NotFound)
        ));

        assert!(assigner.assign(&hash(2), "3,4", 1).unwrap());
        assigner
            .transition(&hash(2), TransferStatus::NumbersAssigned, TransferStatus::Failed)
            .unwrap();

        let record = TransferRepository::new(db.conn().unwrap())
            .find_by_hash(&hash(2))
            .unwrap()
            .unwrap();
        assert_eq!(record.status, TransferStatus::Failed);
        // lottery fields survive later transitions
        assert_eq!(record.lottery_numbers.as_deref(), Some("3,4"));
    }

    #[test]
    fn concurrent_assigns_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfers.db").display().to_string();
        {
            let db = Database::new(&path).unwrap();
            TransferRepository::new(db.conn().unwrap())
                .insert_batch(&[transfer(10, 1, 5)])
                .unwrap();
        }

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2u64)
            .map(|worker| {
                let barrier = barrier.clone();
                let path = path.clone();
                thread::spawn(move || {
                    let db = Database::connect(&path).unwrap();
                    let assigner = LotteryAssigner::new(db.conn().unwrap());
                    barrier.wait();
                    assigner.assign(&hash(1), &format!("{worker}"), worker).unwrap()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn concurrent_assign_next_never_double_assigns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfers.db").display().to_string();
        {
            let db = Database::new(&path).unwrap();
            TransferRepository::new(db.conn().unwrap())
                .insert_batch(&[transfer(10, 1, 5)])
                .unwrap();
        }

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let barrier = barrier.clone();
                let path = path.clone();
                thread::spawn(move || {
                    let db = Database::connect(&path).unwrap();
                    let assigner = LotteryAssigner::new(db.conn().unwrap());
                    barrier.wait();
                    assigner.assign_next(&request("5")).map(|a| a.transaction_hash)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let assigned = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(assigned, 1);
        assert!(results.iter().all(|r| matches!(
            r,
            Ok(_) | Err(AssignError::NotFound) | Err(AssignError::Conflict(_))
        )));
    }
}
