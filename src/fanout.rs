// ============================================================================
// Multi-Recipient Fan-out
// ============================================================================
//
// One request, many destination devices sharing a ciphertext:
//
// 1. resolve every distinct recipient (any unknown -> 404)
// 2. check the combined unidentified access key (-> 401)
// 3. validate each account's device topology; any failure aborts the batch
// 4. deliver one envelope per device on a bounded worker pool
//
// Devices that cannot be reached are reported back, not failed.
//
// ============================================================================

use courier_error::{AccountDeviceErrors, AppError, AppResult};
use courier_types::{
    Account, Envelope, EnvelopeType, MultiRecipientMessage, SendMultiRecipientMessageResponse,
    UnidentifiedAccessKey,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::accounts::AccountDirectory;
use crate::delivery::MessageSender;
use crate::metrics::Metrics;
use crate::utils::now_millis;
use crate::validation::{validate_complete_device_list, validate_registration_ids};

/// Per-request delivery options shared by every recipient
#[derive(Debug, Clone, Copy)]
pub struct FanoutOptions {
    pub timestamp: i64,
    pub online: bool,
    pub urgent: bool,
}

pub struct FanoutExecutor {
    accounts: Arc<dyn AccountDirectory>,
    sender: Arc<MessageSender>,
    workers: Arc<Semaphore>,
    metrics: Arc<Metrics>,
}

impl FanoutExecutor {
    pub fn new(
        accounts: Arc<dyn AccountDirectory>,
        sender: Arc<MessageSender>,
        worker_count: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            accounts,
            sender,
            workers: Arc::new(Semaphore::new(worker_count.max(1))),
            metrics,
        }
    }

    pub async fn send_multi_recipient_message(
        &self,
        access_key: Option<&UnidentifiedAccessKey>,
        message: &MultiRecipientMessage,
        options: FanoutOptions,
    ) -> AppResult<SendMultiRecipientMessageResponse> {
        let accounts = self.resolve_recipients(message).await?;

        let access_key = access_key.ok_or_else(|| AppError::unauthorized("Missing access key"))?;
        verify_combined_access_key(accounts.values(), access_key)?;

        validate_topology(&accounts, message)?;

        let unreachable = self.deliver(accounts, message, options).await;
        Ok(SendMultiRecipientMessageResponse {
            unreachable: unreachable.into_iter().collect(),
        })
    }

    async fn resolve_recipients(&self, message: &MultiRecipientMessage) -> AppResult<BTreeMap<Uuid, Account>> {
        let mut accounts = BTreeMap::new();
        for uuid in message.recipient_uuids() {
            let account = self
                .accounts
                .get_by_uuid(uuid)
                .await?
                .ok_or_else(|| AppError::not_found("Recipient not found"))?;
            accounts.insert(uuid, account);
        }
        Ok(accounts)
    }

    async fn deliver(
        &self,
        accounts: BTreeMap<Uuid, Account>,
        message: &MultiRecipientMessage,
        options: FanoutOptions,
    ) -> BTreeSet<Uuid> {
        let unreachable = Arc::new(Mutex::new(BTreeSet::new()));
        let accounts: HashMap<Uuid, Arc<Account>> = accounts
            .into_iter()
            .map(|(uuid, account)| (uuid, Arc::new(account)))
            .collect();
        let server_timestamp = now_millis();
        let mut tasks = JoinSet::new();

        for recipient in &message.recipients {
            let Some(account) = accounts.get(&recipient.uuid).cloned() else {
                continue;
            };
            let envelope = Envelope {
                guid: Uuid::new_v4(),
                envelope_type: EnvelopeType::UnidentifiedSender,
                timestamp: options.timestamp,
                server_timestamp,
                source_uuid: None,
                source_device: None,
                destination_uuid: recipient.uuid,
                content: message.payload_for(recipient),
                urgent: options.urgent,
                ephemeral: options.online,
            };
            let device_id = recipient.device_id;
            let sender = Arc::clone(&self.sender);
            let workers = Arc::clone(&self.workers);
            let unreachable = Arc::clone(&unreachable);
            let metrics = Arc::clone(&self.metrics);

            tasks.spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return;
                };
                let delivered = match account.device(device_id) {
                    Some(device) => sender
                        .send_message(&account, device, &envelope, options.online)
                        .await
                        .map_err(|e| e.to_string()),
                    None => Err("device disappeared".to_string()),
                };
                if let Err(reason) = delivered {
                    tracing::debug!(device_id, reason = %reason, "Recipient device unreachable");
                    metrics.unreachable_recipients.inc();
                    if let Ok(mut set) = unreachable.lock() {
                        set.insert(account.uuid);
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Fan-out delivery task failed");
            }
        }

        let result = match unreachable.lock() {
            Ok(set) => set.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        result
    }
}

/// XOR every recipient's key and compare once, in constant time. Every
/// account is folded in even after one without a usable key turns up, so the
/// work done does not depend on where that account sits in the batch.
fn verify_combined_access_key<'a>(
    accounts: impl Iterator<Item = &'a Account>,
    presented: &UnidentifiedAccessKey,
) -> AppResult<()> {
    let mut all_present = true;
    let mut combined = UnidentifiedAccessKey::UNRESTRICTED;
    for account in accounts {
        let key = account.unidentified_access.combinable_key();
        all_present &= key.is_some();
        let key = key.unwrap_or(UnidentifiedAccessKey::UNRESTRICTED);
        combined = UnidentifiedAccessKey::combine([&combined, &key]);
    }

    let matches = combined.verify(presented);
    if all_present && matches {
        Ok(())
    } else {
        Err(AppError::unauthorized("Invalid combined access key"))
    }
}

fn validate_topology(accounts: &BTreeMap<Uuid, Account>, message: &MultiRecipientMessage) -> AppResult<()> {
    let mut mismatched = Vec::new();
    let mut stale = Vec::new();

    for (uuid, account) in accounts {
        let addressed: Vec<_> = message.recipients.iter().filter(|r| r.uuid == *uuid).collect();
        let device_ids: BTreeSet<u32> = addressed.iter().map(|r| r.device_id).collect();

        if let Err(devices) = validate_complete_device_list(account, &device_ids, false, None) {
            mismatched.push(AccountDeviceErrors { uuid: *uuid, devices });
            continue;
        }
        let registration_ids = addressed
            .iter()
            .map(|r| (r.device_id, u32::from(r.registration_id)));
        if let Err(devices) = validate_registration_ids(account, registration_ids) {
            stale.push(AccountDeviceErrors { uuid: *uuid, devices });
        }
    }

    if !mismatched.is_empty() {
        return Err(AppError::MultiRecipientMismatchedDevices(mismatched));
    }
    if !stale.is_empty() {
        return Err(AppError::MultiRecipientStaleDevices(stale));
    }
    Ok(())
}
