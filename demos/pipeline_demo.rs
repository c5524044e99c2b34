//! EMAP流水线演示
//!
//! 在进程内依次完成：HL7解析 → 交换消息 → 对账，
//! 最后输出患者、就诊、位置停留与检验结果。

use anyhow::Result;
use chrono::Utc;
use emap_hl7::{Hl7Context, Hl7Dispatcher};
use emap_star::{InterchangeProcessor, ProcessOutcome};
use tracing::{info, warn};

const FEED: [&str; 5] = [
    concat!(
        "MSH|^~\\&|EPIC|UCLH|HL7|UCLH|201209211843||ADT^A01|1|P|2.2\r",
        "EVN|A01|201209211843\r",
        "PID|1||50032556~9999999999||TESTSURNAME^TESTFORENAME||19870612|M\r",
        "PV1|1|I|H2HH^H203^H203-11||||||||||||||||123412341234|||||||||||||||||||||||||201209211740"
    ),
    concat!(
        "MSH|^~\\&|EPIC|UCLH|HL7|UCLH|201209221000||ADT^A02|2|P|2.2\r",
        "EVN|A02|201209221000\r",
        "PID|1||50032556~9999999999\r",
        "PV1|1|I|T11E^BY02^BY02-17|||H2HH^H203^H203-11|||||||||||||123412341234|||||||||||||||||||||||||201209211740"
    ),
    concat!(
        "MSH|^~\\&|WinPath|UCLH|||201209221230||ORU^R01|3|P|2.4\r",
        "PID|1||50032556\r",
        "PV1|1|I|T11E^BY02^BY02-17||||||||||||||||123412341234\r",
        "ORC|RE|91393667|12U444444\r",
        "OBR|1|91393667|12U444444|FBC||201209221100|201209221130\r",
        "OBX|1|NM|HB||142|g/L|120-160\r",
        "OBX|2|NM|WCC||7.1|x10^9/L|4.0-11.0"
    ),
    concat!(
        "MSH|^~\\&|EPIC|UCLH|HL7|UCLH|201209231500||ADT^A03|4|P|2.2\r",
        "EVN|A03|201209231500\r",
        "PID|1||50032556~9999999999\r",
        "PV1|1|I|T11E^BY02^BY02-17||||||||||||||||123412341234|||||||||||||||||DIS||||||||201209211740|201209231455"
    ),
    // 不接受的发送方
    concat!(
        "MSH|^~\\&|OTHER|UCLH|HL7|UCLH|201209231600||ADT^A08|5|P|2.2\r",
        "PID|1||50032556"
    ),
];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("启动EMAP流水线演示");

    let dispatcher = Hl7Dispatcher::new(Hl7Context::default());
    let processor = InterchangeProcessor::new();

    for (index, raw) in FEED.iter().enumerate() {
        let unid = index as i64 + 1;
        let dispatched = dispatcher.dispatch(raw, unid);
        info!(
            "[{}] {} {}: {} messages",
            unid,
            dispatched.message_code,
            dispatched.outcome,
            dispatched.messages.len()
        );

        for message in &dispatched.messages {
            println!("{}", serde_json::to_string_pretty(message)?);
            match processor.process(message, Utc::now()).await? {
                ProcessOutcome::Applied => info!("  applied {}", message.source_message_id()),
                ProcessOutcome::Duplicate => info!("  duplicate {}", message.source_message_id()),
                ProcessOutcome::Dropped(reason) => warn!("  dropped {}: {}", message.source_message_id(), reason),
            }
        }
    }

    print_store(&processor).await;
    info!("EMAP流水线演示完成");
    Ok(())
}

async fn print_store(processor: &InterchangeProcessor) {
    let store = processor.store();
    let store = store.read().await;

    println!("\n患者:");
    for mrn in store.mrns.iter() {
        println!("  #{} mrn={:?} nhs={:?}", mrn.id, mrn.data.mrn, mrn.data.nhs_number);
    }

    println!("就诊:");
    for visit in store.hospital_visits.iter() {
        println!(
            "  #{} {} admitted={:?} discharged={:?}",
            visit.id, visit.data.encounter, visit.data.admission_time, visit.data.discharge_time
        );
    }

    println!("位置停留:");
    for stay in store.location_visits.iter() {
        let location = store
            .locations
            .get(stay.data.location_id)
            .map(|l| l.data.location_string.as_str())
            .unwrap_or("?");
        println!(
            "  {} from {:?} to {:?}",
            location, stay.data.admission_time, stay.data.discharge_time
        );
    }

    println!("检验结果: {}", store.lab_results.len());
    println!("审计行: {}", store.audit_count());
}
