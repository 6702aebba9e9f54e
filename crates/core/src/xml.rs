//! CFDI 4.0 XML rendering of provider payloads.

use chrono::NaiveDateTime;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use rust_decimal::Decimal;
use std::io::Cursor;

use crate::complement::{CfdiPayload, CfdiType, DATE_FORMAT};
use crate::error::{CfdiError, Result};

const NS_CFDI: &str = "http://www.sat.gob.mx/cfd/4";
const NS_PAGOS: &str = "http://www.sat.gob.mx/Pagos20";
const NS_TFD: &str = "http://www.sat.gob.mx/TimbreFiscalDigital";

/// Fiscal stamp to embed under `cfdi:Complemento`.
#[derive(Debug, Clone)]
pub struct TaxStamp {
    pub uuid: String,
    pub stamped_at: NaiveDateTime,
}

fn xml_err<E: std::fmt::Display>(e: E) -> CfdiError {
    CfdiError::Xml(e.to_string())
}

/// Amounts with at least two decimals, trailing zeros beyond that removed.
pub fn format_decimal(d: Decimal) -> String {
    let s = d.normalize().to_string();
    match s.find('.') {
        Some(dot) if s.len() - dot - 1 >= 2 => s,
        Some(dot) => format!("{s}{}", "0".repeat(2 - (s.len() - dot - 1))),
        None => format!("{s}.00"),
    }
}

struct CfdiWriter {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl CfdiWriter {
    fn new() -> Result<Self> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_err)?;
        Ok(Self { writer })
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut elem = BytesStart::new(name);
        for (k, v) in attrs {
            elem.push_attribute((*k, *v));
        }
        self.writer.write_event(Event::Start(elem)).map_err(xml_err)
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut elem = BytesStart::new(name);
        for (k, v) in attrs {
            elem.push_attribute((*k, *v));
        }
        self.writer.write_event(Event::Empty(elem)).map_err(xml_err)
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_err)
    }

    fn finish(self) -> Result<String> {
        String::from_utf8(self.writer.into_inner().into_inner()).map_err(xml_err)
    }
}

pub fn render_cfdi(payload: &CfdiPayload, stamp: Option<&TaxStamp>) -> Result<String> {
    let mut w = CfdiWriter::new()?;

    let cfdi_type = match payload.cfdi_type {
        CfdiType::Ingress => "I",
        CfdiType::Payment => "P",
    };
    let subtotal: Decimal = payload.items.iter().map(|i| i.subtotal).sum();
    let total: Decimal = payload.items.iter().map(|i| i.total).sum();
    let subtotal = format_decimal(subtotal);
    let total = format_decimal(total);

    let mut root: Vec<(&str, &str)> = vec![
        ("xmlns:cfdi", NS_CFDI),
        ("Version", "4.0"),
        ("Serie", payload.serie.as_str()),
    ];
    if let Some(folio) = &payload.folio {
        root.push(("Folio", folio.as_str()));
    }
    root.extend([
        ("Fecha", payload.date.as_str()),
        ("Moneda", payload.currency.as_str()),
        ("SubTotal", subtotal.as_str()),
        ("Total", total.as_str()),
        ("TipoDeComprobante", cfdi_type),
        ("Exportacion", payload.exportation.as_str()),
        ("LugarExpedicion", payload.expedition_place.as_str()),
    ]);
    if let Some(form) = &payload.payment_form {
        root.push(("FormaPago", form.as_str()));
    }
    if let Some(method) = &payload.payment_method {
        root.push(("MetodoPago", method.as_str()));
    }
    if payload.complement.is_some() {
        root.push(("xmlns:pago20", NS_PAGOS));
    }
    if stamp.is_some() {
        root.push(("xmlns:tfd", NS_TFD));
    }
    w.start("cfdi:Comprobante", &root)?;

    w.empty(
        "cfdi:Emisor",
        &[
            ("Rfc", payload.issuer.rfc.as_str()),
            ("RegimenFiscal", payload.issuer.fiscal_regime.as_str()),
        ],
    )?;

    let r = &payload.receiver;
    w.empty(
        "cfdi:Receptor",
        &[
            ("Rfc", r.rfc.as_str()),
            ("Nombre", r.name.as_str()),
            ("DomicilioFiscalReceptor", r.tax_zip_code.as_str()),
            ("RegimenFiscalReceptor", r.fiscal_regime.as_str()),
            ("UsoCFDI", r.cfdi_use.as_str()),
        ],
    )?;

    w.start("cfdi:Conceptos", &[])?;
    for item in &payload.items {
        let quantity = item.quantity.normalize().to_string();
        let unit_price = format_decimal(item.unit_price);
        let amount = format_decimal(item.subtotal);
        w.empty(
            "cfdi:Concepto",
            &[
                ("ClaveProdServ", item.product_code.as_str()),
                ("NoIdentificacion", item.identification_number.as_str()),
                ("Cantidad", quantity.as_str()),
                ("ClaveUnidad", item.unit_code.as_str()),
                ("Descripcion", item.description.as_str()),
                ("ValorUnitario", unit_price.as_str()),
                ("Importe", amount.as_str()),
                ("ObjetoImp", item.tax_object.as_str()),
            ],
        )?;
    }
    w.end("cfdi:Conceptos")?;

    if payload.complement.is_some() || stamp.is_some() {
        w.start("cfdi:Complemento", &[])?;
        if let Some(complement) = &payload.complement {
            let sum: Decimal = complement.payments.iter().map(|p| p.amount).sum();
            w.start("pago20:Pagos", &[("Version", "2.0")])?;
            w.empty("pago20:Totales", &[("MontoTotalPagos", format_decimal(sum).as_str())])?;
            for payment in &complement.payments {
                let amount = format_decimal(payment.amount);
                let rate = payment.exchange_rate.normalize().to_string();
                w.start(
                    "pago20:Pago",
                    &[
                        ("FechaPago", payment.date.as_str()),
                        ("FormaDePagoP", payment.payment_form.as_str()),
                        ("MonedaP", payment.currency.as_str()),
                        ("TipoCambioP", rate.as_str()),
                        ("Monto", amount.as_str()),
                    ],
                )?;
                for doc in &payment.related_documents {
                    let partiality = doc.partiality_number.to_string();
                    let previous = format_decimal(doc.previous_balance_amount);
                    let paid = format_decimal(doc.amount_paid);
                    let remaining = format_decimal(doc.remaining_balance);
                    w.empty(
                        "pago20:DoctoRelacionado",
                        &[
                            ("IdDocumento", doc.uuid.as_str()),
                            ("MonedaDR", doc.currency.as_str()),
                            ("NumParcialidad", partiality.as_str()),
                            ("ImpSaldoAnt", previous.as_str()),
                            ("ImpPagado", paid.as_str()),
                            ("ImpSaldoInsoluto", remaining.as_str()),
                            ("ObjetoImpDR", doc.tax_object.as_str()),
                        ],
                    )?;
                }
                w.end("pago20:Pago")?;
            }
            w.end("pago20:Pagos")?;
        }
        if let Some(stamp) = stamp {
            let stamped_at = stamp.stamped_at.format(DATE_FORMAT).to_string();
            w.empty(
                "tfd:TimbreFiscalDigital",
                &[
                    ("Version", "1.1"),
                    ("UUID", stamp.uuid.as_str()),
                    ("FechaTimbrado", stamped_at.as_str()),
                ],
            )?;
        }
        w.end("cfdi:Complemento")?;
    }

    w.end("cfdi:Comprobante")?;
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn format_decimal_cases() {
        assert_eq!(format_decimal(dec!(100)), "100.00");
        assert_eq!(format_decimal(dec!(1500.0)), "1500.00");
        assert_eq!(format_decimal(dec!(49.90)), "49.90");
        assert_eq!(format_decimal(dec!(0.005)), "0.005");
        assert_eq!(format_decimal(dec!(0)), "0.00");
    }
}
