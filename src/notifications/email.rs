// src/notifications/email.rs

use rust_decimal::Decimal;

use super::{
    BookingConfirmationEmail, NotificationJob, PaymentConfirmationEmail, PaymentFailureEmail,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

pub fn render(job: &NotificationJob, app_name: &str) -> EmailMessage {
    match job {
        NotificationJob::BookingConfirmation(j) => booking_confirmation(j, app_name),
        NotificationJob::PaymentConfirmation(j) => payment_confirmation(j, app_name),
        NotificationJob::PaymentFailure(j) => payment_failure(j, app_name),
    }
}

fn booking_confirmation(j: &BookingConfirmationEmail, app_name: &str) -> EmailMessage {
    let text_body = format!(
        "Dear {name},\n\n\
         Your booking has been confirmed.\n\n\
         Booking ID: {id}\n\
         Property: {title}\n\
         Location: {location}\n\
         Check-in: {check_in}\n\
         Check-out: {check_out}\n\
         Total price: {total}\n\n\
         Thank you for choosing {app}.\n",
        name = j.guest_name,
        id = j.booking_id,
        title = j.listing_title,
        location = j.listing_location,
        check_in = j.check_in_date,
        check_out = j.check_out_date,
        total = money(j.total_price),
        app = app_name,
    );

    let rows = [
        ("Booking ID", j.booking_id.to_string()),
        ("Property", j.listing_title.clone()),
        ("Location", j.listing_location.clone()),
        ("Check-in", j.check_in_date.to_string()),
        ("Check-out", j.check_out_date.to_string()),
        ("Total price", money(j.total_price)),
    ];
    let html_body = html_page(
        "Booking Confirmed",
        &j.guest_name,
        "Your booking has been confirmed.",
        &rows,
        app_name,
    );

    EmailMessage {
        to: j.guest_email.clone(),
        subject: format!("Booking Confirmation - {app_name}"),
        text_body,
        html_body,
    }
}

fn payment_confirmation(j: &PaymentConfirmationEmail, app_name: &str) -> EmailMessage {
    let amount = format!("{} {}", money(j.amount), j.currency);
    let transaction = j.transaction_id.clone().unwrap_or_else(|| "-".to_string());

    let text_body = format!(
        "Dear {name},\n\n\
         We received your payment and your booking is confirmed.\n\n\
         Booking ID: {id}\n\
         Property: {title}\n\
         Location: {location}\n\
         Check-in: {check_in}\n\
         Check-out: {check_out}\n\
         Amount paid: {amount}\n\
         Transaction: {transaction}\n\n\
         Thank you for choosing {app}.\n",
        name = j.guest_name,
        id = j.booking_id,
        title = j.listing_title,
        location = j.listing_location,
        check_in = j.check_in_date,
        check_out = j.check_out_date,
        app = app_name,
    );

    let rows = [
        ("Booking ID", j.booking_id.to_string()),
        ("Property", j.listing_title.clone()),
        ("Location", j.listing_location.clone()),
        ("Check-in", j.check_in_date.to_string()),
        ("Check-out", j.check_out_date.to_string()),
        ("Amount paid", amount),
        ("Transaction", transaction),
    ];
    let html_body = html_page(
        "Payment Received",
        &j.guest_name,
        "We received your payment and your booking is confirmed.",
        &rows,
        app_name,
    );

    EmailMessage {
        to: j.guest_email.clone(),
        subject: format!("Payment Confirmation - {app_name}"),
        text_body,
        html_body,
    }
}

fn payment_failure(j: &PaymentFailureEmail, app_name: &str) -> EmailMessage {
    let amount = format!("{} {}", money(j.amount), j.currency);

    let text_body = format!(
        "Dear {name},\n\n\
         Your payment for booking {id} ({title}) could not be completed.\n\n\
         Amount: {amount}\n\
         Reason: {reason}\n\n\
         This payment cannot be retried. Please contact support or make a new booking.\n\n\
         {app}\n",
        name = j.guest_name,
        id = j.booking_id,
        title = j.listing_title,
        reason = j.error_message,
        app = app_name,
    );

    let rows = [
        ("Booking ID", j.booking_id.to_string()),
        ("Property", j.listing_title.clone()),
        ("Amount", amount),
        ("Reason", j.error_message.clone()),
    ];
    let html_body = html_page(
        "Payment Failed",
        &j.guest_name,
        "Your payment could not be completed and cannot be retried. Please contact support or make a new booking.",
        &rows,
        app_name,
    );

    EmailMessage {
        to: j.guest_email.clone(),
        subject: format!("Payment Failed - {app_name}"),
        text_body,
        html_body,
    }
}

fn money(value: Decimal) -> String {
    format!("{:.2}", value.round_dp(2))
}

fn html_page(
    heading: &str,
    name: &str,
    lead: &str,
    rows: &[(&str, String)],
    app_name: &str,
) -> String {
    let mut table = String::new();
    for (label, value) in rows {
        table.push_str(&format!(
            "<tr><td style=\"padding:4px 12px 4px 0;color:#555\">{}</td><td style=\"padding:4px 0\"><strong>{}</strong></td></tr>",
            escape_html(label),
            escape_html(value)
        ));
    }

    format!(
        "<!DOCTYPE html><html><body style=\"font-family:Arial,sans-serif;color:#222\">\
         <h2>{heading}</h2>\
         <p>Dear {name},</p>\
         <p>{lead}</p>\
         <table>{table}</table>\
         <p>Thank you for choosing {app}.</p>\
         </body></html>",
        heading = escape_html(heading),
        name = escape_html(name),
        lead = escape_html(lead),
        app = escape_html(app_name),
    )
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
