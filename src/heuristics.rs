//! Rule-based answers over scraped page text.
//!
//! Pages render product, sale and customer records partly as JSON-ish text
//! (`"stock": 0`, `"amount": 120`). These counters read those fields straight
//! out of the context string; no parsing of the surrounding structure is
//! attempted.

use regex::Regex;
use std::sync::LazyLock;

static STOCK_ZERO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""stock"\s*:\s*0"#).expect("valid regex"));
static OUT_OF_STOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)out of stock").expect("valid regex"));
static STOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""stock"\s*:\s*(\d+)"#).expect("valid regex"));
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""name"\s*:"#).expect("valid regex"));
static AMOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""amount"\s*:\s*\d+"#).expect("valid regex"));
static TOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""total"\s*:\s*\d+"#).expect("valid regex"));
static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

/// Highest stock level still reported as "low stock".
pub const LOW_STOCK_MAX: u64 = 3;

pub fn count_matches(re: &Regex, text: &str) -> u64 {
    re.find_iter(text).count() as u64
}

/// Sums the first run of digits inside every match of `re`.
///
/// Values that do not fit in a `u64` count as zero.
pub fn sum_numeric_field(re: &Regex, text: &str) -> u64 {
    re.find_iter(text)
        .map(|m| {
            DIGITS_RE
                .find(m.as_str())
                .and_then(|d| d.as_str().parse::<u64>().ok())
                .unwrap_or(0)
        })
        .fold(0u64, |acc, n| acc.saturating_add(n))
}

/// Counts out-of-stock products.
///
/// `"stock": 0` fields are the reliable signal; free-text "out of stock"
/// labels are counted too and the larger of the two wins.
pub fn out_of_stock_count(context: &str) -> u64 {
    let by_json = count_matches(&STOCK_ZERO_RE, context);
    let by_text = count_matches(&OUT_OF_STOCK_RE, context);
    by_json.max(by_text)
}

pub fn low_stock_count(context: &str) -> u64 {
    STOCK_RE
        .captures_iter(context)
        .filter_map(|c| c.get(1)?.as_str().parse::<u64>().ok())
        .filter(|n| (1..=LOW_STOCK_MAX).contains(n))
        .count() as u64
}

/// Sum of all stock fields, or the number of named records when no stock
/// is listed.
pub fn total_inventory_items(context: &str) -> u64 {
    let summed = sum_numeric_field(&STOCK_RE, context);
    if summed > 0 {
        return summed;
    }
    count_matches(&NAME_RE, context)
}

pub fn total_sales_amount(context: &str) -> u64 {
    let by_amount = sum_numeric_field(&AMOUNT_RE, context);
    let by_total = sum_numeric_field(&TOTAL_RE, context);
    by_amount.max(by_total)
}

pub fn customers_count(context: &str) -> u64 {
    count_matches(&NAME_RE, context)
}

pub fn inventory_answer(context: &str) -> String {
    format!("Total inventory items: {}.", total_inventory_items(context))
}

/// Answers the question from the context if one of the fixed rules applies.
///
/// Rules are checked in order; the sales rule only answers when a positive
/// amount was found and otherwise falls through to the next rule.
pub fn rule_answer(question: &str, context: &str) -> Option<String> {
    let lower = question.to_lowercase();

    if lower.contains("out of stock") {
        return Some(format!(
            "There are {} products that are out of stock.",
            out_of_stock_count(context)
        ));
    }
    if lower.contains("low stock") {
        return Some(format!(
            "There are {} products in low stock.",
            low_stock_count(context)
        ));
    }
    if (lower.contains("how many") && lower.contains("inventory"))
        || lower.contains("total inventory")
    {
        return Some(inventory_answer(context));
    }
    if lower.contains("sales") || lower.contains("revenue") {
        let sales = total_sales_amount(context);
        if sales > 0 {
            return Some(format!("Total sales amount is ${}.", sales));
        }
    }
    if lower.contains("customer") {
        return Some(format!("You have {} customers.", customers_count(context)));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = r#"=== PAGE: /inventory ===
[{"name": "Cola", "stock": 0}, {"name": "Chips", "stock":2},
 {"name": "Bread", "stock" : 3}, {"name": "Milk", "stock": 12}]
"#;

    #[test]
    fn test_out_of_stock_prefers_larger_signal() {
        assert_eq!(out_of_stock_count(INVENTORY), 1);
        let labels = "Cola - Out of stock\nChips - out of stock\nMilk - OUT OF STOCK";
        assert_eq!(out_of_stock_count(labels), 3);
    }

    #[test]
    fn test_stock_zero_pattern_matches_leading_zero_digits() {
        // "stock": 05 still starts with 0
        assert_eq!(out_of_stock_count(r#""stock": 05"#), 1);
    }

    #[test]
    fn test_low_stock_excludes_zero_and_above_three() {
        assert_eq!(low_stock_count(INVENTORY), 2);
        assert_eq!(low_stock_count(r#""stock": 4, "stock": 0"#), 0);
    }

    #[test]
    fn test_total_inventory_sums_stock() {
        assert_eq!(total_inventory_items(INVENTORY), 17);
    }

    #[test]
    fn test_total_inventory_falls_back_to_name_count() {
        let ctx = r#"{"name": "A", "stock": 0} {"name": "B"}"#;
        assert_eq!(total_inventory_items(ctx), 2);
        assert_eq!(total_inventory_items("plain text"), 0);
    }

    #[test]
    fn test_sales_takes_max_of_amount_and_total() {
        let ctx = r#"{"amount": 10} {"amount": 15} {"total": 20}"#;
        assert_eq!(total_sales_amount(ctx), 25);
        let ctx = r#"{"amount": 10} {"total": 40}"#;
        assert_eq!(total_sales_amount(ctx), 40);
    }

    #[test]
    fn test_sum_saturates_on_huge_values() {
        let ctx = r#""amount": 99999999999999999999999"#;
        assert_eq!(total_sales_amount(ctx), 0);
        let ctx = format!(r#""amount": {} "amount": {}"#, u64::MAX, 5);
        assert_eq!(total_sales_amount(&ctx), u64::MAX);
    }

    #[test]
    fn test_rule_precedence() {
        assert_eq!(
            rule_answer("Which items are OUT OF STOCK?", INVENTORY).as_deref(),
            Some("There are 1 products that are out of stock.")
        );
        assert_eq!(
            rule_answer("any low stock?", INVENTORY).as_deref(),
            Some("There are 2 products in low stock.")
        );
        assert_eq!(
            rule_answer("How many items in inventory", INVENTORY).as_deref(),
            Some("Total inventory items: 17.")
        );
        assert_eq!(
            rule_answer("total inventory please", INVENTORY).as_deref(),
            Some("Total inventory items: 17.")
        );
    }

    #[test]
    fn test_sales_rule_falls_through_when_zero() {
        // No amounts: the sales rule yields and the customer rule answers
        assert_eq!(
            rule_answer("sales per customer", INVENTORY).as_deref(),
            Some("You have 4 customers.")
        );
        assert_eq!(rule_answer("what is our revenue", INVENTORY), None);
    }

    #[test]
    fn test_sales_rule_answers() {
        let ctx = r#"{"amount": 120} {"amount": 30}"#;
        assert_eq!(
            rule_answer("Total sales?", ctx).as_deref(),
            Some("Total sales amount is $150.")
        );
    }

    #[test]
    fn test_no_rule_matches() {
        assert_eq!(rule_answer("Who is the manager?", INVENTORY), None);
    }
}
