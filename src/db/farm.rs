//! Farm-planning schema: the models the undo engine was built around, plus
//! fixture rows used by the demo binary and the tests.

use serde_json::json;

use super::models::{ModelDef, Record, RecordId, Schema};


pub const SAMPLE_FARM_ID: RecordId = 1;

pub const SAMPLE_PLAN_ID: RecordId = 8;

pub const SAMPLE_PESTICIDE_ID: RecordId = 71;


/// `TaskSchedule.field_cultivation_id` is a plain sibling key: a schedule is
/// restored after the field cultivation it points at, however the plan's
/// associations are ordered.
pub fn farm_planning_schema() -> Schema {
    Schema::new()
        .with_model(ModelDef::shared("Farm").label("name"))
        .with_model(ModelDef::shared("Crop").label("name"))
        .with_model(ModelDef::shared("AgriculturalTask").label("name"))
        .with_model(ModelDef::shared("Pest").label("name"))
        .with_model(
            ModelDef::new("CultivationPlan")
                .label("plan_name")
                .references("farm", "Farm", "farm_id")
                .owns("cultivation_plan_fields", "CultivationPlanField", "cultivation_plan_id")
                .owns("cultivation_plan_crops", "CultivationPlanCrop", "cultivation_plan_id")
                .owns("field_cultivations", "FieldCultivation", "cultivation_plan_id")
                .owns("task_schedules", "TaskSchedule", "cultivation_plan_id"),
        )
        .with_model(
            ModelDef::new("CultivationPlanField")
                .label("name")
                .owns("field_cultivations", "FieldCultivation", "cultivation_plan_field_id"),
        )
        .with_model(
            ModelDef::new("CultivationPlanCrop")
                .label("name")
                .references("crop", "Crop", "crop_id")
                .owns("field_cultivations", "FieldCultivation", "cultivation_plan_crop_id"),
        )
        .with_model(ModelDef::new("FieldCultivation"))
        .with_model(
            ModelDef::new("TaskSchedule")
                .foreign_key("field_cultivation_id", "FieldCultivation")
                .owns("task_schedule_items", "TaskScheduleItem", "task_schedule_id"),
        )
        .with_model(
            ModelDef::new("TaskScheduleItem")
                .label("name")
                .references("agricultural_task", "AgriculturalTask", "agricultural_task_id"),
        )
        .with_model(
            ModelDef::new("Pesticide")
                .label("name")
                .references("crop", "Crop", "crop_id")
                .references("pest", "Pest", "pest_id")
                .owns("pesticide_usage_constraint", "PesticideUsageConstraint", "pesticide_id")
                .owns("pesticide_application_detail", "PesticideApplicationDetail", "pesticide_id"),
        )
        .with_model(ModelDef::new("PesticideUsageConstraint"))
        .with_model(ModelDef::new("PesticideApplicationDetail"))
}


/// Shared master data every fixture below points at.
pub fn sample_reference_data() -> Vec<Record> {
    vec![
        Record::new("Farm", SAMPLE_FARM_ID, json!({"name": "North Field Farm", "region": "jp"})),
        Record::new("Crop", 1, json!({"name": "Tomato", "variety": "Momotaro"})),
        Record::new("Crop", 2, json!({"name": "Cabbage", "variety": "Spring"})),
        Record::new("AgriculturalTask", 1, json!({"name": "Weeding"})),
        Record::new("Pest", 1, json!({"name": "Aphid"})),
    ]
}


/// A plan owning two rows in each of five tables: 11 owned rows over six
/// tables, plus the farm it references. Insert order is FK-safe.
pub fn sample_plan() -> Vec<Record> {
    vec![
        Record::new(
            "CultivationPlan",
            SAMPLE_PLAN_ID,
            json!({
                "farm_id": SAMPLE_FARM_ID,
                "plan_name": "2026 Spring Plan",
                "status": "draft",
                "planning_start_date": "2026-03-01",
                "planning_end_date": "2026-10-31",
                "total_area": 240.5
            }),
        ),
        Record::new(
            "CultivationPlanField",
            21,
            json!({"cultivation_plan_id": SAMPLE_PLAN_ID, "name": "Field A", "area": 120.0, "daily_fixed_cost": 80}),
        ),
        Record::new(
            "CultivationPlanField",
            22,
            json!({"cultivation_plan_id": SAMPLE_PLAN_ID, "name": "Field B", "area": 120.5, "daily_fixed_cost": 95}),
        ),
        Record::new(
            "CultivationPlanCrop",
            31,
            json!({"cultivation_plan_id": SAMPLE_PLAN_ID, "name": "Tomato", "variety": "Momotaro", "crop_id": null}),
        ),
        Record::new(
            "CultivationPlanCrop",
            32,
            json!({"cultivation_plan_id": SAMPLE_PLAN_ID, "name": "Cabbage", "variety": "Spring", "crop_id": null}),
        ),
        Record::new(
            "FieldCultivation",
            41,
            json!({
                "cultivation_plan_id": SAMPLE_PLAN_ID,
                "cultivation_plan_field_id": 21,
                "cultivation_plan_crop_id": 31,
                "start_date": "2026-04-10",
                "completion_date": "2026-08-20",
                "area": 60.0
            }),
        ),
        Record::new(
            "FieldCultivation",
            42,
            json!({
                "cultivation_plan_id": SAMPLE_PLAN_ID,
                "cultivation_plan_field_id": 22,
                "cultivation_plan_crop_id": 32,
                "start_date": "2026-03-15",
                "completion_date": "2026-06-01",
                "area": 80.0
            }),
        ),
        Record::new(
            "TaskSchedule",
            51,
            json!({"cultivation_plan_id": SAMPLE_PLAN_ID, "field_cultivation_id": 41, "category": "general", "status": "active"}),
        ),
        Record::new(
            "TaskSchedule",
            52,
            json!({"cultivation_plan_id": SAMPLE_PLAN_ID, "field_cultivation_id": null, "category": "fertilizer", "status": "active"}),
        ),
        Record::new(
            "TaskScheduleItem",
            61,
            json!({"task_schedule_id": 51, "name": "Mulching", "scheduled_date": "2026-04-20", "agricultural_task_id": null}),
        ),
        Record::new(
            "TaskScheduleItem",
            62,
            json!({"task_schedule_id": 52, "name": "Top dressing", "scheduled_date": "2026-05-05", "agricultural_task_id": null}),
        ),
    ]
}


/// A pesticide referencing a crop and a pest, with its two owned detail rows.
pub fn sample_pesticide() -> Vec<Record> {
    vec![
        Record::new(
            "Pesticide",
            SAMPLE_PESTICIDE_ID,
            json!({"name": "Neem Oil", "crop_id": 1, "pest_id": 1, "active_ingredient": "azadirachtin"}),
        ),
        Record::new(
            "PesticideUsageConstraint",
            81,
            json!({"pesticide_id": SAMPLE_PESTICIDE_ID, "max_applications": 3, "min_interval_days": 7}),
        ),
        Record::new(
            "PesticideApplicationDetail",
            91,
            json!({"pesticide_id": SAMPLE_PESTICIDE_ID, "dilution_ratio": 1000, "amount_per_m2": 0.15}),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_every_association_targets_a_declared_model() {
        let schema = farm_planning_schema();
        for model in schema.models() {
            for assoc in &model.associations {
                assert!(
                    schema.model(&assoc.target).is_some(),
                    "{}.{} targets undeclared {}",
                    model.name,
                    assoc.name,
                    assoc.target
                );
            }
        }
    }

    #[test]
    fn test_sample_plan_shape() {
        let rows = sample_plan();
        let tables: BTreeSet<&str> = rows.iter().map(|r| r.model.as_str()).collect();
        assert_eq!(rows.len(), 11);
        assert_eq!(tables.len(), 6);
    }

    #[test]
    fn test_field_cultivation_has_three_owners() {
        let schema = farm_planning_schema();
        let owners = schema
            .models()
            .filter(|m| m.owned_associations().any(|a| a.target == "FieldCultivation"))
            .count();
        assert_eq!(owners, 3);
    }
}
