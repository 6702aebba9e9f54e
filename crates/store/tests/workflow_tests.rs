use cfdi_core::PaymentParams;
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use stamping::mock::MockClient;
use std::time::Duration;
use store::workflow::{ComplementRequest, FiscalOverrides, WorkflowSettings};
use store::{ArtifactKind, Store, Workflow, WorkflowError};
use tempfile::TempDir;

const INVOICE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<cfdi:Comprobante xmlns:cfdi="http://www.sat.gob.mx/cfd/4"
    xmlns:tfd="http://www.sat.gob.mx/TimbreFiscalDigital"
    Version="4.0" Fecha="2024-01-15T10:20:30" SubTotal="8620.69" Total="10000.00"
    TipoDeComprobante="I" LugarExpedicion="78000">
  <cfdi:Emisor Rfc="XIA190128J61" Nombre="XENON INDUSTRIAL ARTICLES"/>
  <cfdi:Receptor Rfc="XAXX010101000" Nombre="PUBLICO EN GENERAL" UsoCFDI="S01"/>
  <cfdi:Complemento>
    <tfd:TimbreFiscalDigital UUID="A1B2C3D4-E5F6-7890-ABCD-EF1234567890"/>
  </cfdi:Complemento>
</cfdi:Comprobante>"#;

fn workflow(client: std::sync::Arc<MockClient>) -> (Workflow, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("db")).unwrap();
    let settings = WorkflowSettings {
        audit_log: dir.path().join("audit.jsonl"),
        ..WorkflowSettings::default()
    };
    (Workflow::new(store, client, settings), dir)
}

fn request(invoice_id: u64) -> ComplementRequest {
    ComplementRequest {
        invoice_id,
        ..ComplementRequest::default()
    }
}

#[tokio::test]
async fn upload_pay_and_reject_second_payment() {
    let (wf, _dir) = workflow(MockClient::with_latency(Duration::ZERO));

    let uploaded = wf.upload(INVOICE_XML.as_bytes()).unwrap();
    let invoice_id = uploaded.record.id;
    assert!(uploaded.defaulted.is_empty());
    assert_eq!(uploaded.record.invoice.total, dec!(10000.00));
    assert!(!uploaded.record.invoice.paid);

    let payment = ComplementRequest {
        invoice_id,
        payment: PaymentParams {
            amount: Some(dec!(10000.00)),
            ..PaymentParams::default()
        },
        ..ComplementRequest::default()
    };
    let generated = wf.generate_complement(payment).await.unwrap();
    assert_eq!(generated.complement.amount, dec!(10000.00));
    assert_eq!(generated.complement.payment_method_code, "03");
    let xml = generated.complement.xml_content.as_deref().unwrap();
    assert!(xml.contains(r#"ImpSaldoInsoluto="0.00""#));
    assert!(generated.complement.external_id.starts_with("MOCK-CP-"));

    let after = wf.store().get_invoice(invoice_id).unwrap();
    assert!(after.invoice.paid);
    assert!(after.invoice.provider_uuid.is_some());
    assert_eq!(wf.store().list_complements().unwrap().len(), 1);

    let err = wf.generate_complement(request(invoice_id)).await.unwrap_err();
    assert!(matches!(err, WorkflowError::AlreadyPaid(id) if id == invoice_id));
    assert_eq!(err.http_status(), 409);
    assert_eq!(wf.store().list_complements().unwrap().len(), 1);

    let events: Vec<String> = wf
        .audit_log()
        .read_all()
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(events, vec!["invoice_uploaded", "complement_stamped"]);
}

#[tokio::test]
async fn generic_receiver_gets_corrected_context() {
    let (wf, _dir) = workflow(MockClient::with_latency(Duration::ZERO));
    let id = wf.upload(INVOICE_XML.as_bytes()).unwrap().record.id;

    let generated = wf
        .generate_complement(ComplementRequest {
            invoice_id: id,
            fiscal: FiscalOverrides {
                expedition_place: Some("11590".to_string()),
                receiver_tax_zip_code: Some("7800".to_string()),
                fiscal_regime_code: Some("601".to_string()),
                cfdi_use_code: None,
            },
            ..ComplementRequest::default()
        })
        .await
        .unwrap();

    let fields: Vec<&str> = generated.warnings.iter().map(|w| w.field).collect();
    assert_eq!(
        fields,
        vec!["expedition_place", "fiscal_regime_code", "receiver_tax_zip_code"]
    );

    let xml = String::from_utf8(wf.download(generated.complement.id, ArtifactKind::Xml).unwrap().bytes)
        .unwrap();
    assert!(xml.contains(r#"LugarExpedicion="78000""#));
    assert!(xml.contains(r#"RegimenFiscalReceptor="616""#));
    assert!(xml.contains(r#"UsoCFDI="S01""#));
}

#[tokio::test]
async fn provider_failure_persists_nothing() {
    let (wf, _dir) = workflow(MockClient::rejecting(500, "servicio no disponible"));
    let id = wf.upload(INVOICE_XML.as_bytes()).unwrap().record.id;

    let err = wf.generate_complement(request(id)).await.unwrap_err();
    assert_eq!(err.http_status(), 502);
    assert!(err.to_string().contains("servicio no disponible"));

    let record = wf.store().get_invoice(id).unwrap();
    assert!(!record.invoice.paid);
    assert!(record.invoice.provider_uuid.is_none());
    assert!(wf.store().complement_for_invoice(id).unwrap().is_none());

    let last = wf.audit_log().read_all().unwrap().pop().unwrap();
    assert_eq!(last.event_type, "complement_failed");
}

#[tokio::test]
async fn unknown_invoice_is_not_found() {
    let (wf, _dir) = workflow(MockClient::with_latency(Duration::ZERO));
    let err = wf.generate_complement(request(999)).await.unwrap_err();
    assert_eq!(err.http_status(), 404);
    assert!(matches!(wf.summary(999), Err(WorkflowError::NotFound(_))));
}

#[tokio::test]
async fn duplicate_upload_conflicts() {
    let (wf, _dir) = workflow(MockClient::with_latency(Duration::ZERO));
    wf.upload(INVOICE_XML.as_bytes()).unwrap();
    let err = wf.upload(INVOICE_XML.as_bytes()).unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicateUuid(_)));
    assert_eq!(err.http_status(), 409);
}

#[tokio::test]
async fn fail_closed_rejects_incomplete_upload() {
    let dir = tempfile::tempdir().unwrap();
    let wf = Workflow::new(
        Store::temporary().unwrap(),
        MockClient::with_latency(Duration::ZERO),
        WorkflowSettings {
            policy: cfdi_core::FallbackPolicy::FailClosed,
            audit_log: dir.path().join("audit.jsonl"),
            ..WorkflowSettings::default()
        },
    );
    let err = wf.upload(br#"<cfdi:Comprobante Total="116.00">"#).unwrap_err();
    assert_eq!(err.http_status(), 422);
    assert!(wf.list().unwrap().is_empty());
}

#[tokio::test]
async fn listing_summary_and_downloads() {
    let (wf, _dir) = workflow(MockClient::with_latency(Duration::ZERO));
    let first = wf.upload(INVOICE_XML.as_bytes()).unwrap().record.id;
    let second = wf
        .upload(INVOICE_XML.replace("A1B2C3D4", "B1B2C3D4").as_bytes())
        .unwrap()
        .record
        .id;
    let complement = wf.generate_complement(request(first)).await.unwrap().complement;

    let listing = wf.list().unwrap();
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].record.id, second);
    assert!(listing[0].complement.is_none());
    assert_eq!(listing[1].complement.as_ref().map(|c| c.id), Some(complement.id));

    let summary = wf.summary(complement.id).unwrap();
    assert_eq!(summary.invoice_uuid, "A1B2C3D4-E5F6-7890-ABCD-EF1234567890");
    assert_eq!(summary.status, "generated");
    assert_eq!(
        summary.pdf_file,
        Some(format!("complemento_pago_{}.pdf", complement.external_id))
    );

    let pdf = wf.download(complement.id, ArtifactKind::Pdf).unwrap();
    assert_eq!(pdf.content_type, "application/pdf");
    assert!(pdf.bytes.starts_with(b"%PDF"));

    let upload_key = wf.store().get_invoice(first).unwrap().upload_key.unwrap();
    assert_eq!(wf.store().upload(&upload_key).unwrap(), INVOICE_XML.as_bytes());
}
