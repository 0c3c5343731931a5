

#[inline]
pub fn safe_truncate_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}


/// `CultivationPlan` → `cultivation_plan`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}


/// Element id the presentation layer uses for a row, e.g. `cultivation_plan_8`.
pub fn dom_id(model: &str, id: i64) -> String {
    format!("{}_{}", snake_case(model), id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_truncate_ellipsis() {
        assert_eq!(safe_truncate_ellipsis("hello world", 5), "hello...");
        assert_eq!(safe_truncate_ellipsis("hi", 10), "hi");
    }

    #[test]
    fn test_safe_truncate_ellipsis_multibyte() {
        assert_eq!(safe_truncate_ellipsis("春の作付け計画", 3), "春の作...");
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("CultivationPlan"), "cultivation_plan");
        assert_eq!(snake_case("Farm"), "farm");
        assert_eq!(snake_case("TaskScheduleItem"), "task_schedule_item");
        assert_eq!(snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn test_dom_id() {
        assert_eq!(dom_id("CultivationPlan", 8), "cultivation_plan_8");
    }
}
