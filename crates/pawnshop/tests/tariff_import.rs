//! Tariff configuration loaded from CSV into a live ledger.

use std::io::Write;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal_macros::dec;

use pawnshop::workflows::pledges::{
    BranchId, CategoryId, LendingPolicy, ManualClock, MemoryStore, PledgeService,
    SpecificityTier, TariffCsvImporter, TariffImportError,
};

const TARIFFS: &str = "\
name,category_id,branch_id,loan_percent,interest_rate,min_loan,max_loan,effective_from,effective_to,is_active,description
General,,,40,10,,,2023-01-01,,true,catch-all
Downtown,,2,45,9,,,2023-01-01,,yes,
Gold,1,,55,7,100,5000,2024-01-01,,true,
Gold downtown,1,2,60,6,100,5000,2024-01-01,,true,
Gold downtown 2023,1,2,65,6,100,5000,2023-01-01,2023-12-31,true,expired
Retired,1,2,90,1,,,2024-01-01,,false,inactive
";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

#[test]
fn imported_tariffs_resolve_by_specificity() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(TARIFFS.as_bytes()).expect("write csv");

    let drafts = TariffCsvImporter::from_path(file.path()).expect("parse csv");
    assert_eq!(drafts.len(), 6);

    let service = PledgeService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(ManualClock::on(date(2024, 6, 1))),
        LendingPolicy::default(),
    );
    service.import_tariffs(drafts).expect("import");

    let on = date(2024, 6, 1);
    let pick = |category: i64, branch: i64| {
        service
            .resolve_tariff(CategoryId(category), BranchId(branch), dec!(1000), on)
            .expect("lookup")
            .expect("tariff found")
    };

    let downtown_gold = pick(1, 2);
    assert_eq!(downtown_gold.tariff.name, "Gold downtown");
    assert_eq!(downtown_gold.tier, SpecificityTier::CategoryAndBranch);

    assert_eq!(pick(1, 1).tariff.name, "Gold");
    assert_eq!(pick(3, 2).tariff.name, "Downtown");
    assert_eq!(pick(3, 1).tariff.name, "General");

    let last_year = service
        .resolve_tariff(CategoryId(1), BranchId(2), dec!(1000), date(2023, 6, 1))
        .expect("lookup")
        .expect("tariff found");
    assert_eq!(last_year.tariff.name, "Gold downtown 2023");
}

#[test]
fn malformed_rows_abort_the_import() {
    let csv = "\
name,category_id,branch_id,loan_percent,interest_rate,min_loan,max_loan,effective_from,effective_to,is_active,description
Fine,,,40,10,,,2023-01-01,,true,
Broken,,,40,10,,,01/02/2023,,true,
";
    match TariffCsvImporter::from_reader(csv.as_bytes()) {
        Err(TariffImportError::Malformed { line, field, .. }) => {
            assert_eq!(line, 3);
            assert_eq!(field, "effective_from");
        }
        other => panic!("expected malformed row, got {other:?}"),
    }
}
