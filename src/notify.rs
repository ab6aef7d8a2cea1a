//! Mapping of backend notification payloads to display-ready content.
//!
//! Pure and total: any payload, including unrecognized kinds, maps to a
//! `Notification` without panicking.

use sonic_rs::{JsonValueTrait, Value};

/// Display-ready notification content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub link: Option<String>,
}

const LINK_CUSTOMER_REQUESTS: &str = "/musteri/taleplerim";
const LINK_CUSTOMER_OFFERS: &str = "/musteri/tekliflerim";
const LINK_VENDOR_REQUESTS: &str = "/satici/talepler";

fn str_field(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).as_str().map(str::to_owned)
}

fn vendor_name(payload: &Value) -> String {
    str_field(payload, "vendor_name").unwrap_or_else(|| "Satıcı".to_owned())
}

/// Translate a `notification.new` payload into `{title, message, link}`.
///
/// Kinds outside the known set fall back to the payload's own `title`/
/// `message`/`link` fields, defaulting to a generic "Bildirim" title.
pub fn map_notification(payload: &Value) -> Notification {
    let kind = payload.get("kind").as_str().unwrap_or_default().to_owned();

    match kind.as_str() {
        "appointment_confirmed" => Notification {
            title: "Randevun onaylandı".to_owned(),
            message: format!("{} randevunu onayladı.", vendor_name(payload)),
            link: Some(LINK_CUSTOMER_REQUESTS.to_owned()),
        },
        "appointment_rejected" => Notification {
            title: "Randevun reddedildi".to_owned(),
            message: format!("{} randevunu reddetti.", vendor_name(payload)),
            link: Some(LINK_CUSTOMER_REQUESTS.to_owned()),
        },
        "appointment_cancelled" => Notification {
            title: "Randevu iptal edildi".to_owned(),
            message: format!("{} randevuyu iptal etti.", vendor_name(payload)),
            link: Some(LINK_CUSTOMER_REQUESTS.to_owned()),
        },
        "new_offer" => Notification {
            title: "Yeni teklif".to_owned(),
            message: format!("{} talebine yeni bir teklif gönderdi.", vendor_name(payload)),
            link: Some(LINK_CUSTOMER_OFFERS.to_owned()),
        },
        "new_service_request" => Notification {
            title: "Yeni hizmet talebi".to_owned(),
            message: match str_field(payload, "customer_name") {
                Some(name) => format!("{name} yeni bir hizmet talebi oluşturdu."),
                None => "Yeni bir hizmet talebi oluşturuldu.".to_owned(),
            },
            link: Some(LINK_VENDOR_REQUESTS.to_owned()),
        },
        _ => Notification {
            title: str_field(payload, "title").unwrap_or_else(|| "Bildirim".to_owned()),
            message: str_field(payload, "message").unwrap_or_default(),
            link: str_field(payload, "link"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: &str) -> Value {
        sonic_rs::from_str(json).expect("valid test payload")
    }

    #[test]
    fn appointment_confirmed_template() {
        let got = map_notification(&payload(
            r#"{"kind":"appointment_confirmed","vendor_name":"Ahmet Usta"}"#,
        ));
        assert_eq!(
            got,
            Notification {
                title: "Randevun onaylandı".to_owned(),
                message: "Ahmet Usta randevunu onayladı.".to_owned(),
                link: Some("/musteri/taleplerim".to_owned()),
            }
        );
    }

    #[test]
    fn appointment_rejected_and_cancelled_templates() {
        let rejected = map_notification(&payload(
            r#"{"kind":"appointment_rejected","vendor_name":"Mehmet Usta"}"#,
        ));
        assert_eq!(rejected.title, "Randevun reddedildi");
        assert_eq!(rejected.message, "Mehmet Usta randevunu reddetti.");

        let cancelled = map_notification(&payload(
            r#"{"kind":"appointment_cancelled","vendor_name":"Mehmet Usta"}"#,
        ));
        assert_eq!(cancelled.title, "Randevu iptal edildi");
        assert_eq!(cancelled.link.as_deref(), Some("/musteri/taleplerim"));
    }

    #[test]
    fn new_offer_links_to_offers_page() {
        let got = map_notification(&payload(r#"{"kind":"new_offer","vendor_name":"Ali Usta"}"#));
        assert_eq!(got.title, "Yeni teklif");
        assert_eq!(got.link.as_deref(), Some("/musteri/tekliflerim"));
    }

    #[test]
    fn new_service_request_for_vendor() {
        let got = map_notification(&payload(
            r#"{"kind":"new_service_request","customer_name":"Zeynep"}"#,
        ));
        assert_eq!(got.message, "Zeynep yeni bir hizmet talebi oluşturdu.");
        assert_eq!(got.link.as_deref(), Some("/satici/talepler"));
    }

    #[test]
    fn unknown_kind_falls_back_to_payload_fields() {
        let got = map_notification(&payload(
            r#"{"kind":"unknown_future_kind","title":"X","message":"Y"}"#,
        ));
        assert_eq!(
            got,
            Notification {
                title: "X".to_owned(),
                message: "Y".to_owned(),
                link: None,
            }
        );
    }

    #[test]
    fn fallback_defaults_never_panic() {
        let got = map_notification(&payload(r#"{}"#));
        assert_eq!(got.title, "Bildirim");
        assert_eq!(got.message, "");
        assert_eq!(got.link, None);

        let with_link = map_notification(&payload(r#"{"kind":"x","link":"/nereye"}"#));
        assert_eq!(with_link.link.as_deref(), Some("/nereye"));
    }

    #[test]
    fn missing_vendor_name_uses_generic_label() {
        let got = map_notification(&payload(r#"{"kind":"appointment_confirmed"}"#));
        assert_eq!(got.message, "Satıcı randevunu onayladı.");
    }
}
