//! 交换消息处理器
//!
//! 每条消息开始前在存储上打检查点，全部对账步骤成功后提交，
//! 失败时回滚到检查点。整个过程持有存储的写锁，因此同一患者的写入是串行的。

use crate::store::{StarStore, Timestamps};
use crate::{flowsheet, lab, location, pending, person, visit};
use chrono::{DateTime, Utc};
use emap_core::{EmapError, Result};
use emap_interchange::{AdtEvent, AdtMessage, Flowsheet, InterchangeMessage, LabOrderMsg, LabResultMsg};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 单条消息的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Applied,
    /// 同一消息ID已经处理过
    Duplicate,
    /// 对账失败，消息被丢弃
    Dropped(String),
}

/// 对账处理器
#[derive(Debug, Clone, Default)]
pub struct InterchangeProcessor {
    store: Arc<RwLock<StarStore>>,
}

impl InterchangeProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Arc<RwLock<StarStore>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<RwLock<StarStore>> {
        self.store.clone()
    }

    /// 处理一条交换消息
    pub async fn process(&self, msg: &InterchangeMessage, processing_time: DateTime<Utc>) -> Result<ProcessOutcome> {
        let mut guard = self.store.write().await;
        if guard.is_processed(msg.source_message_id()) {
            debug!("Message {} already processed", msg.source_message_id());
            return Ok(ProcessOutcome::Duplicate);
        }

        guard.begin();
        match apply(&mut guard, msg, processing_time) {
            Ok(()) => {
                guard.commit();
                guard.mark_processed(msg.source_message_id());
                info!("Applied {} {}", msg.message_type(), msg.source_message_id());
                Ok(ProcessOutcome::Applied)
            }
            Err(e) => {
                guard.rollback();
                if e.is_reconciliation_failure() {
                    warn!("Dropping {} {}: {}", msg.message_type(), msg.source_message_id(), e);
                    Ok(ProcessOutcome::Dropped(e.to_string()))
                } else {
                    Err(e)
                }
            }
        }
    }
}

fn apply(store: &mut StarStore, msg: &InterchangeMessage, processing_time: DateTime<Utc>) -> Result<()> {
    match msg {
        InterchangeMessage::Adt(adt) => apply_adt(store, adt, processing_time),
        InterchangeMessage::LabOrder(order) => apply_lab_order(store, order, processing_time),
        InterchangeMessage::LabResult(result) => apply_lab_result(store, result, processing_time),
        InterchangeMessage::Flowsheet(flowsheet) => apply_flowsheet(store, flowsheet, processing_time),
    }
}

/// 只有真正来自ADT流的消息才可信地更新就诊和位置
fn is_from_adt_feed(adt: &AdtMessage) -> bool {
    adt.trigger_event.starts_with('A')
}

fn apply_adt(store: &mut StarStore, adt: &AdtMessage, processing_time: DateTime<Utc>) -> Result<()> {
    let ts = Timestamps::new(adt.valid_from().unwrap_or(processing_time), processing_time);

    // 1. 标识变更不能先按新标识建档
    if let AdtEvent::ChangePatientIdentifiers { previous } = &adt.event {
        return person::change_identifiers(store, previous, adt, ts);
    }

    // 2. 患者
    let mrn_id = person::get_or_create_mrn(store, adt.mrn.as_deref(), adt.nhs_number.as_deref(), &adt.source_system, ts)?;
    person::update_demographics(store, mrn_id, adt, ts);

    // 3. 合并 / 删除 / 移动就诊
    match &adt.event {
        AdtEvent::MergeById { retired } | AdtEvent::MergePatient { retired } => {
            person::merge(store, retired, mrn_id, &adt.source_system, ts)?;
        }
        AdtEvent::DeletePersonInformation => {
            person::delete_person_information(store, mrn_id, ts);
            return Ok(());
        }
        AdtEvent::MoveVisitInformation {
            previous_visit_number, ..
        } => {
            let encounter = previous_visit_number
                .as_deref()
                .or(adt.visit_number.as_deref())
                .ok_or_else(|| EmapError::RequiredDataMissing("No visit number to move".to_string()))?;
            visit::move_visit(store, encounter, mrn_id, ts)?;
        }
        _ => {}
    }

    // 4. 就诊
    if !is_from_adt_feed(adt) {
        if let Some(encounter) = adt.visit_number.as_deref() {
            visit::get_or_create_minimal_visit(store, mrn_id, encounter, &adt.source_system, ts)?;
        }
        return Ok(());
    }
    let Some(visit_id) = visit::update_from_adt(store, mrn_id, adt, ts)? else {
        if adt.event.is_cancellation() {
            return Err(EmapError::RequiredDataMissing(format!("{} without a visit number", adt.event_name())));
        }
        return Ok(());
    };

    // 5. 计划移动与位置
    pending::process_pending(store, visit_id, adt, ts);
    match &adt.event {
        AdtEvent::SwapLocations { other } => {
            let other_visit = other
                .visit_number
                .as_deref()
                .and_then(|encounter| visit::visit_id(store, encounter))
                .ok_or_else(|| EmapError::RequiredDataMissing("Other visit of location swap is unknown".to_string()))?;
            location::swap_locations(store, visit_id, other_visit, ts)
        }
        _ => location::process_location(store, visit_id, adt, ts),
    }
}

fn lab_visit(store: &mut StarStore, mrn_id: i64, visit_number: Option<&str>, source_system: &str, ts: Timestamps) -> Result<Option<i64>> {
    visit_number
        .map(|encounter| visit::get_or_create_minimal_visit(store, mrn_id, encounter, source_system, ts))
        .transpose()
}

fn apply_lab_order(store: &mut StarStore, order: &LabOrderMsg, processing_time: DateTime<Utc>) -> Result<()> {
    let valid_from = order
        .status_change_datetime
        .or(order.collection_datetime)
        .unwrap_or(processing_time);
    let ts = Timestamps::new(valid_from, processing_time);
    let mrn_id = person::get_or_create_mrn(store, order.mrn.as_deref(), order.nhs_number.as_deref(), &order.source_system, ts)?;
    let visit_id = lab_visit(store, mrn_id, order.visit_number.as_deref(), &order.source_system, ts)?;
    lab::process_order(store, order, mrn_id, visit_id, ts);
    Ok(())
}

fn apply_lab_result(store: &mut StarStore, result: &LabResultMsg, processing_time: DateTime<Utc>) -> Result<()> {
    let valid_from = result
        .result_time
        .or(result.collection_datetime)
        .unwrap_or(processing_time);
    let ts = Timestamps::new(valid_from, processing_time);
    let mrn_id = person::get_or_create_mrn(store, result.mrn.as_deref(), result.nhs_number.as_deref(), &result.source_system, ts)?;
    let visit_id = lab_visit(store, mrn_id, result.visit_number.as_deref(), &result.source_system, ts)?;
    lab::process_result(store, result, mrn_id, visit_id, ts);
    Ok(())
}

fn apply_flowsheet(store: &mut StarStore, flowsheet: &Flowsheet, processing_time: DateTime<Utc>) -> Result<()> {
    let ts = Timestamps::new(flowsheet.updated_time.unwrap_or(flowsheet.observation_time), processing_time);
    let mrn_id = person::get_or_create_mrn(store, flowsheet.mrn.as_deref(), None, &flowsheet.source_system, ts)?;
    let encounter = flowsheet
        .visit_number
        .as_deref()
        .ok_or_else(|| EmapError::RequiredDataMissing(format!("Flowsheet {} has no visit number", flowsheet.flowsheet_id)))?;
    let visit_id = visit::get_or_create_minimal_visit(store, mrn_id, encounter, &flowsheet.source_system, ts)?;
    flowsheet::process_flowsheet(store, flowsheet, visit_id, ts);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use emap_hl7::{Hl7Context, Hl7Dispatcher};
    use emap_interchange::{InterchangeValue, PreviousIdentifiers};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2013, 1, 1, hour, 0, 0).unwrap()
    }

    fn adt(id: &str, trigger: &str, event: AdtEvent, location: &str, hour: u32) -> InterchangeMessage {
        let mut msg = AdtMessage::new(id, "EPIC", trigger, event);
        msg.mrn = Some("40800000".into());
        msg.visit_number = Some("123412341234".into());
        msg.recorded_datetime = Some(at(hour));
        msg.full_location_string = InterchangeValue::save(location.to_string());
        InterchangeMessage::Adt(msg)
    }

    fn merge(id: &str, surviving: &str, retired: &str) -> InterchangeMessage {
        let mut msg = AdtMessage::new(
            id,
            "EPIC",
            "A40",
            AdtEvent::MergePatient {
                retired: PreviousIdentifiers {
                    previous_mrn: Some(retired.into()),
                    previous_nhs_number: None,
                },
            },
        );
        msg.mrn = Some(surviving.into());
        msg.recorded_datetime = Some(at(9));
        InterchangeMessage::Adt(msg)
    }

    const A01: &str = concat!(
        "MSH|^~\\&|EPIC|UCLH|HL7|UCLH|201209211843||ADT^A01|1|P|2.2\r",
        "EVN|A01|201209211843\r",
        "PID|1||50032556~9999999999||TESTSURNAME^TESTFORENAME\r",
        "PV1|1|I|H2HH^H203^H203-11||||||||||||||||123412341234|||||||||||||||||||||||||201209211740"
    );

    #[tokio::test]
    async fn test_admit_scenario_creates_patient_visit_and_location() {
        let dispatcher = Hl7Dispatcher::new(Hl7Context::default());
        let dispatched = dispatcher.dispatch(A01, 1);
        assert_eq!(dispatched.messages.len(), 1);

        let processor = InterchangeProcessor::new();
        let outcome = processor.process(&dispatched.messages[0], now()).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Applied);

        let store = processor.store();
        let store = store.read().await;
        assert_eq!(store.mrns.len(), 1);
        assert_eq!(store.hospital_visits.len(), 1);
        assert_eq!(store.location_visits.len(), 1);

        let visit = store.hospital_visits.iter().next().unwrap();
        assert_eq!(visit.data.encounter, "123412341234");
        assert_eq!(visit.data.patient_class.as_deref(), Some("INPATIENT"));

        let lv = store.location_visits.iter().next().unwrap();
        assert!(lv.data.is_open());
        assert!(!lv.data.inferred_admission);
        assert_eq!(lv.data.admission_time, visit.data.admission_time);
        let location = store.locations.get(lv.data.location_id).unwrap();
        assert_eq!(location.data.location_string, "H2HH^H203^H203-11");
        assert_eq!(store.departments.len(), 1);
        assert_eq!(store.rooms.len(), 1);
        assert_eq!(store.beds.len(), 1);

        let demographics = store.demographics.iter().next().unwrap();
        assert_eq!(demographics.data.lastname.as_deref(), Some("TESTSURNAME"));
    }

    #[tokio::test]
    async fn test_reprocessing_is_idempotent() {
        let processor = InterchangeProcessor::new();
        let msg = adt("0000000001", "A01", AdtEvent::AdmitPatient { admission_datetime: InterchangeValue::save(at(8)) }, "T11E^T11E BY02^BY02-17", 8);

        assert_eq!(processor.process(&msg, now()).await.unwrap(), ProcessOutcome::Applied);
        assert_eq!(processor.process(&msg, now()).await.unwrap(), ProcessOutcome::Duplicate);

        // 相同内容、不同消息ID：不产生新的就诊或审计行
        let mut again = msg.clone();
        again.set_source_message_id("0000000002".into());
        assert_eq!(processor.process(&again, now()).await.unwrap(), ProcessOutcome::Applied);

        let store = processor.store();
        let store = store.read().await;
        assert_eq!(store.hospital_visits.len(), 1);
        assert_eq!(store.location_visits.len(), 1);
        assert_eq!(store.audit_count(), 0);
    }

    #[tokio::test]
    async fn test_admit_transfer_discharge_location_history() {
        let processor = InterchangeProcessor::new();
        let messages = vec![
            adt("1", "A01", AdtEvent::AdmitPatient { admission_datetime: InterchangeValue::save(at(8)) }, "ED^ED RM1^ED-1", 8),
            adt("2", "A02", AdtEvent::TransferPatient { admission_datetime: InterchangeValue::save(at(8)) }, "T11E^BY02^BY02-17", 10),
            // 同一位置的转科不产生新停留
            adt("3", "A02", AdtEvent::TransferPatient { admission_datetime: InterchangeValue::save(at(8)) }, "T11E^BY02^BY02-17", 11),
            adt(
                "4",
                "A03",
                AdtEvent::DischargePatient {
                    discharge_datetime: Some(at(15)),
                    discharge_disposition: Some("Home".into()),
                    discharge_location: None,
                },
                "T11E^BY02^BY02-17",
                15,
            ),
        ];
        for msg in &messages {
            assert_eq!(processor.process(msg, now()).await.unwrap(), ProcessOutcome::Applied);
        }

        let store = processor.store();
        let store = store.read().await;
        let mut stays: Vec<_> = store.location_visits.iter().map(|r| r.data.clone()).collect();
        stays.sort_by_key(|lv| lv.admission_time);

        assert_eq!(stays.len(), 2);
        assert_eq!(stays[0].admission_time, Some(at(8)));
        assert_eq!(stays[0].discharge_time, Some(at(10)));
        assert_eq!(stays[1].admission_time, Some(at(10)));
        assert!(stays[0].discharge_time <= stays[1].admission_time);

        let visit = store.hospital_visits.iter().next().unwrap();
        assert_eq!(visit.data.discharge_time, Some(at(15)));
        assert_eq!(stays[1].discharge_time, visit.data.discharge_time);
        assert_eq!(visit.data.discharge_disposition.as_deref(), Some("Home"));
    }

    #[tokio::test]
    async fn test_merges_are_flattened() {
        let processor = InterchangeProcessor::new();
        processor.process(&merge("1", "B", "A"), now()).await.unwrap();
        processor.process(&merge("2", "C", "B"), now()).await.unwrap();

        let store = processor.store();
        let store = store.read().await;
        let id_of = |mrn: &str| store.mrns.find(|m| m.mrn.as_deref() == Some(mrn)).map(|r| r.id).unwrap();
        let c = id_of("C");
        assert_eq!(person::live_mrn_id(&store, id_of("A")).unwrap(), c);
        assert_eq!(person::live_mrn_id(&store, id_of("B")).unwrap(), c);
        assert_eq!(person::live_mrn_id(&store, c).unwrap(), c);
        // A 的映射被改写两次，留下两条审计行
        let a_mapping = store.mrn_to_live.find(|m| m.mrn_id == id_of("A")).map(|r| r.id).unwrap();
        assert_eq!(store.mrn_to_live.history(a_mapping).count(), 2);
        assert_eq!(store.mrn_to_live.audit_rows().len(), 3);
    }

    #[tokio::test]
    async fn test_pending_transfer_and_cancel() {
        let processor = InterchangeProcessor::new();
        let admit = adt("1", "A01", AdtEvent::AdmitPatient { admission_datetime: InterchangeValue::save(at(8)) }, "ED^RM1^B1", 8);
        let pending = adt(
            "2",
            "A15",
            AdtEvent::PendingTransfer {
                pending_location: InterchangeValue::save("T06^T06A^BY01".into()),
            },
            "ED^RM1^B1",
            9,
        );
        let cancel = adt(
            "3",
            "A26",
            AdtEvent::CancelPendingTransfer {
                pending_location: InterchangeValue::save("T06^T06A^BY01".into()),
                cancelled_datetime: Some(at(10)),
            },
            "ED^RM1^B1",
            10,
        );
        // 从未计划过的取消是空操作
        let orphan_cancel = adt(
            "4",
            "A26",
            AdtEvent::CancelPendingTransfer {
                pending_location: InterchangeValue::save("T99^X^Y".into()),
                cancelled_datetime: Some(at(11)),
            },
            "ED^RM1^B1",
            11,
        );
        for msg in [&admit, &pending, &cancel, &orphan_cancel] {
            assert_eq!(processor.process(msg, now()).await.unwrap(), ProcessOutcome::Applied);
        }

        let store = processor.store();
        let store = store.read().await;
        assert_eq!(store.planned_movements.len(), 1);
        let movement = &store.planned_movements.iter().next().unwrap().data;
        assert!(movement.cancelled);
        assert_eq!(movement.cancelled_datetime, Some(at(10)));
        assert_eq!(movement.event_type, "TRANSFER");
        // 计划移动不改变当前位置
        assert_eq!(store.location_visits.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_admit_removes_stay_with_audit() {
        let processor = InterchangeProcessor::new();
        let admit = adt("1", "A01", AdtEvent::AdmitPatient { admission_datetime: InterchangeValue::save(at(8)) }, "ED^RM1^B1", 8);
        let cancel = adt("2", "A11", AdtEvent::CancelAdmitPatient { cancelled_datetime: Some(at(9)) }, "ED^RM1^B1", 9);
        processor.process(&admit, now()).await.unwrap();
        processor.process(&cancel, now()).await.unwrap();

        let store = processor.store();
        let store = store.read().await;
        assert!(store.location_visits.is_empty());
        assert_eq!(store.location_visits.audit_rows().len(), 1);
        let visit = store.hospital_visits.iter().next().unwrap();
        assert_eq!(visit.data.admission_time, None);
    }

    #[tokio::test]
    async fn test_change_identifiers_to_existing_mrn_is_dropped() {
        let processor = InterchangeProcessor::new();
        processor.process(&merge("1", "NEW", "OLD"), now()).await.unwrap();

        let mut change = AdtMessage::new(
            "2",
            "EPIC",
            "A47",
            AdtEvent::ChangePatientIdentifiers {
                previous: PreviousIdentifiers {
                    previous_mrn: Some("OLD".into()),
                    previous_nhs_number: None,
                },
            },
        );
        change.mrn = Some("NEW".into());
        let outcome = processor.process(&InterchangeMessage::Adt(change), now()).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Dropped(_)));

        // 回滚：消息未被标记为已处理
        let store = processor.store();
        assert!(!store.read().await.is_processed("2"));
    }

    #[tokio::test]
    async fn test_delete_person_information() {
        let processor = InterchangeProcessor::new();
        processor
            .process(&adt("1", "A01", AdtEvent::AdmitPatient { admission_datetime: InterchangeValue::save(at(8)) }, "ED^RM1^B1", 8), now())
            .await
            .unwrap();
        let mut delete = AdtMessage::new("2", "EPIC", "A29", AdtEvent::DeletePersonInformation);
        delete.mrn = Some("40800000".into());
        delete.recorded_datetime = Some(at(12));
        processor.process(&InterchangeMessage::Adt(delete), now()).await.unwrap();

        let store = processor.store();
        let store = store.read().await;
        assert!(store.hospital_visits.is_empty());
        assert!(store.location_visits.is_empty());
        assert!(store.demographics.is_empty());
        assert_eq!(store.mrns.len(), 1);
    }

    #[tokio::test]
    async fn test_lab_result_creates_minimal_visit_and_order() {
        let text = [
            "MSH|^~\\&|WinPath|UCLH|||201301011230||ORU^R01|1|P|2.4",
            "PID|1||40800000",
            "PV1|1|I|T11E^BY02^BY02-17||||||||||||||||999",
            "ORC|RE|91393667|13U444444",
            "OBR|1|91393667|13U444444|FBC||201301011000|201301011030",
            "OBX|1|NM|HB||142|g/L|130-170",
            "OBX|2|NM|WCC||7.1",
        ]
        .join("\r");
        let dispatched = Hl7Dispatcher::new(Hl7Context::default()).dispatch(&text, 5);
        let processor = InterchangeProcessor::new();
        for msg in &dispatched.messages {
            assert_eq!(processor.process(msg, now()).await.unwrap(), ProcessOutcome::Applied);
        }

        let store = processor.store();
        let store = store.read().await;
        assert_eq!(store.mrns.len(), 1);
        assert_eq!(store.hospital_visits.len(), 1);
        // 检验消息不建立位置停留
        assert!(store.location_visits.is_empty());
        assert_eq!(store.lab_orders.len(), 1);
        assert_eq!(store.lab_results.len(), 2);
        let hb = store.lab_results.find(|r| r.test_item_code == "HB").unwrap();
        assert_eq!(hb.data.numeric_value, Some(142.0));
        assert_eq!(hb.data.reference_high, Some(170.0));
    }

    #[tokio::test]
    async fn test_message_without_identifiers_is_dropped() {
        let processor = InterchangeProcessor::new();
        let msg = InterchangeMessage::Adt(AdtMessage::new("1", "EPIC", "A08", AdtEvent::UpdatePatientInfo));
        let outcome = processor.process(&msg, now()).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Dropped(_)));
    }

    fn with_mrn(msg: InterchangeMessage, mrn: &str) -> InterchangeMessage {
        match msg {
            InterchangeMessage::Adt(mut adt) => {
                adt.mrn = Some(mrn.into());
                InterchangeMessage::Adt(adt)
            }
            other => other,
        }
    }

    fn admit(id: &str, hour: u32) -> InterchangeMessage {
        adt(id, "A01", AdtEvent::AdmitPatient { admission_datetime: InterchangeValue::save(at(hour)) }, "ED^RM1^B1", hour)
    }

    #[tokio::test]
    async fn test_cancel_for_unknown_visit_is_dropped() {
        let processor = InterchangeProcessor::new();
        let cancels = [
            adt("1", "A11", AdtEvent::CancelAdmitPatient { cancelled_datetime: Some(at(9)) }, "ED^RM1^B1", 9),
            adt("2", "A12", AdtEvent::CancelTransferPatient { cancelled_datetime: Some(at(9)) }, "ED^RM1^B1", 9),
            adt("3", "A13", AdtEvent::CancelDischargePatient { cancelled_datetime: Some(at(9)) }, "ED^RM1^B1", 9),
        ];
        for cancel in &cancels {
            let outcome = processor.process(cancel, now()).await.unwrap();
            assert!(matches!(outcome, ProcessOutcome::Dropped(ref reason) if reason.contains("unknown hospital visit")));
        }

        // 回滚后连患者也没有留下
        let store = processor.store();
        let store = store.read().await;
        assert!(store.hospital_visits.is_empty());
        assert!(store.location_visits.is_empty());
        assert!(store.mrns.is_empty());
        assert_eq!(store.audit_count(), 0);
    }

    #[tokio::test]
    async fn test_older_transfer_does_not_rewrite_location_history() {
        let processor = InterchangeProcessor::new();
        processor.process(&admit("1", 10), now()).await.unwrap();
        // 记录于 08:00 的转科晚到
        let late = adt("2", "A02", AdtEvent::TransferPatient { admission_datetime: InterchangeValue::save(at(10)) }, "T11E^BY02^BY02-17", 8);
        assert_eq!(processor.process(&late, now()).await.unwrap(), ProcessOutcome::Applied);

        let store = processor.store();
        let store = store.read().await;
        assert_eq!(store.location_visits.len(), 1);
        let stay = &store.location_visits.iter().next().unwrap().data;
        assert!(stay.is_open());
        assert_eq!(stay.admission_time, Some(at(10)));
        assert!(store.location_visits.audit_rows().is_empty());
        for audit in store.hospital_visits.audit_rows() {
            assert!(audit.valid_from <= audit.valid_until);
        }
    }

    #[tokio::test]
    async fn test_older_message_only_fills_empty_visit_fields() {
        let processor = InterchangeProcessor::new();
        let mut admit_msg = AdtMessage::new("1", "EPIC", "A01", AdtEvent::AdmitPatient { admission_datetime: InterchangeValue::save(at(10)) });
        admit_msg.mrn = Some("40800000".into());
        admit_msg.visit_number = Some("123412341234".into());
        admit_msg.recorded_datetime = Some(at(10));
        admit_msg.mode_of_arrival = InterchangeValue::save("Ambulance".into());
        processor.process(&InterchangeMessage::Adt(admit_msg), now()).await.unwrap();

        let mut late = AdtMessage::new("2", "EPIC", "A08", AdtEvent::UpdatePatientInfo);
        late.mrn = Some("40800000".into());
        late.visit_number = Some("123412341234".into());
        late.recorded_datetime = Some(at(7));
        late.mode_of_arrival = InterchangeValue::save("Walk-in".into());
        late.hospital_service = Some("CARDIOLOGY".into());
        let discharge = adt(
            "3",
            "A03",
            AdtEvent::DischargePatient {
                discharge_datetime: Some(at(7)),
                discharge_disposition: None,
                discharge_location: None,
            },
            "ED^RM1^B1",
            7,
        );
        processor.process(&InterchangeMessage::Adt(late), now()).await.unwrap();
        processor.process(&discharge, now()).await.unwrap();

        let store = processor.store();
        let store = store.read().await;
        let visit = &store.hospital_visits.iter().next().unwrap().data;
        assert_eq!(visit.arrival_method.as_deref(), Some("Ambulance"));
        assert_eq!(visit.hospital_service.as_deref(), Some("CARDIOLOGY"));
        assert_eq!(visit.discharge_time, None);
        // 离开时间早于入住，停留保持打开
        assert!(store.location_visits.iter().next().unwrap().data.is_open());
    }

    #[tokio::test]
    async fn test_visit_of_another_patient_is_not_taken_over() {
        let processor = InterchangeProcessor::new();
        processor.process(&admit("1", 8), now()).await.unwrap();

        let other = with_mrn(adt("2", "A08", AdtEvent::UpdatePatientInfo, "ED^RM1^B1", 9), "99999999");
        let outcome = processor.process(&other, now()).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Dropped(ref reason) if reason.contains("belongs to MRN")));

        let store = processor.store();
        let store = store.read().await;
        let owner = store.mrns.find(|m| m.mrn.as_deref() == Some("40800000")).unwrap().id;
        assert_eq!(store.hospital_visits.iter().next().unwrap().data.mrn_id, owner);
        // 新患者随消息一起回滚
        assert_eq!(store.mrns.len(), 1);
    }

    #[tokio::test]
    async fn test_visit_follows_merged_patient() {
        let processor = InterchangeProcessor::new();
        processor.process(&admit("1", 8), now()).await.unwrap();
        processor.process(&merge("2", "50000000", "40800000"), now()).await.unwrap();

        let update = with_mrn(adt("3", "A08", AdtEvent::UpdatePatientInfo, "ED^RM1^B1", 10), "50000000");
        assert_eq!(processor.process(&update, now()).await.unwrap(), ProcessOutcome::Applied);

        let store = processor.store();
        let store = store.read().await;
        let survivor = store.mrns.find(|m| m.mrn.as_deref() == Some("50000000")).unwrap().id;
        assert_eq!(store.hospital_visits.iter().next().unwrap().data.mrn_id, survivor);
        assert_eq!(store.hospital_visits.len(), 1);
    }

    #[tokio::test]
    async fn test_visit_keeps_service_and_consultants() {
        let dispatcher = Hl7Dispatcher::new(Hl7Context::default());
        let text = concat!(
            "MSH|^~\\&|EPIC|UCLH|HL7|UCLH|201209211843||ADT^A01|1|P|2.2\r",
            "EVN|A01|201209211843\r",
            "PID|1||50032556\r",
            "PV1|1|I|H2HH^H203^H203-11||||C2400^BEAN^MRS^^^DR|C3100^SMITH^JOHN^^^DR||CARDIOLOGY||||A||||ELECTIVE|123412341234"
        );
        let dispatched = dispatcher.dispatch(text, 1);
        let processor = InterchangeProcessor::new();
        assert_eq!(processor.process(&dispatched.messages[0], now()).await.unwrap(), ProcessOutcome::Applied);

        let store = processor.store();
        let store = store.read().await;
        let visit = &store.hospital_visits.iter().next().unwrap().data;
        assert_eq!(visit.hospital_service.as_deref(), Some("CARDIOLOGY"));
        assert_eq!(visit.admit_source.as_deref(), Some("A"));
        assert_eq!(visit.patient_type.as_deref(), Some("ELECTIVE"));
        assert_eq!(visit.attending_consultants, vec!["C2400".to_string()]);
        assert_eq!(visit.referring_consultants, vec!["C3100".to_string()]);
    }

    #[tokio::test]
    async fn test_transfer_without_open_stay_infers_previous_location() {
        let processor = InterchangeProcessor::new();
        let mut transfer = AdtMessage::new("1", "EPIC", "A02", AdtEvent::TransferPatient { admission_datetime: InterchangeValue::Unknown });
        transfer.mrn = Some("40800000".into());
        transfer.visit_number = Some("123412341234".into());
        transfer.recorded_datetime = Some(at(10));
        transfer.full_location_string = InterchangeValue::save("T11E^BY02^BY02-17".into());
        transfer.previous_location_string = Some("ED^RM1^B1".into());
        processor.process(&InterchangeMessage::Adt(transfer), now()).await.unwrap();

        let store = processor.store();
        let store = store.read().await;
        let ed = store.locations.find(|l| l.location_string == "ED^RM1^B1").unwrap().id;
        let previous = store.location_visits.find(|lv| lv.location_id == ed).unwrap();
        assert_eq!(previous.data.discharge_time, Some(at(10)));
        assert!(previous.data.inferred_admission);
        assert_eq!(store.location_visits.len(), 2);
    }
}
