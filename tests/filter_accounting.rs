use std::io::Write;

use jobacct_rs::{
    AccountingFile, AcctError, Filter, Record, Schemas, Template, Value, parse_filter,
    parse_options,
};
use tempfile::NamedTempFile;

/// Build one SGE accounting line from the fields the tests care about.
fn sge_line(owner: &str, qname: &str, job_number: u32, wallclock: &str, slots: u32) -> String {
    let mut cols = vec!["0".to_string(); 45];
    cols[0] = qname.to_string();
    cols[1] = "node1".to_string();
    cols[2] = "staff".to_string();
    cols[3] = owner.to_string();
    cols[4] = "sim".to_string();
    cols[5] = job_number.to_string();
    cols[6] = "sge".to_string();
    cols[8] = "1388534400".to_string();
    cols[9] = "1388534460".to_string();
    cols[10] = "1388538000".to_string();
    cols[13] = wallclock.to_string();
    cols[31] = "NONE".to_string();
    cols[32] = "defaultdepartment".to_string();
    cols[33] = "NONE".to_string();
    cols[34] = slots.to_string();
    cols[39] = "-u x".to_string();
    cols[41] = "NONE".to_string();
    cols.join(":")
}

fn accounting_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "# Version: 8.1").unwrap();
    writeln!(file, "{}", sge_line("John Smith", "main.q", 1, "150.0", 4)).unwrap();
    writeln!(file, "{}", sge_line("alice", "short.q", 2, "50.0", 8)).unwrap();
    writeln!(file, "{}", sge_line("abcdef", "main.q", 3, "3600.0", 1)).unwrap();
    writeln!(file).unwrap();
    file.flush().unwrap();
    file
}

fn records(file: &NamedTempFile) -> Vec<Record> {
    AccountingFile::open(file.path(), Schemas::new().unwrap())
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

fn job_numbers(filter: &Filter, records: &[Record]) -> Vec<i64> {
    records
        .iter()
        .filter(|r| filter.matches(r).unwrap())
        .map(|r| match r.get("job_number").unwrap() {
            Value::Int(n) => n,
            other => panic!("Expected an integer job number, got {other:?}"),
        })
        .collect()
}

fn compile(text: &str) -> Filter {
    let schemas = Schemas::new().unwrap();
    parse_filter(text, schemas.extended()).unwrap()
}

#[test]
fn test_reads_records_and_skips_comments() {
    let file = accounting_file();
    let records = records(&file);
    assert_eq!(records.len(), 3);
    assert_eq!(records[1].get("owner").unwrap(), Value::Str("alice".to_string()));
}

#[test]
fn test_numeric_comparison() {
    let file = accounting_file();
    let records = records(&file);
    assert_eq!(job_numbers(&compile("(ru_wallclock > 100)"), &records), vec![1, 3]);
    assert_eq!(job_numbers(&compile("(slots <= 4)"), &records), vec![1, 3]);
}

#[test]
fn test_and_or_match_their_parts() {
    let file = accounting_file();
    let records = records(&file);
    let a = compile("(qname *= main.q)");
    let b = compile("(slots >= 4)");
    let both = compile("(and (qname *= main.q) (slots >= 4))");
    let either = compile("(or (qname *= main.q) (slots >= 4))");
    for record in &records {
        let (ma, mb) = (a.matches(record).unwrap(), b.matches(record).unwrap());
        assert_eq!(both.matches(record).unwrap(), ma && mb);
        assert_eq!(either.matches(record).unwrap(), ma || mb);
    }
}

#[test]
fn test_regex_prefix_versus_glob_full_match() {
    let file = accounting_file();
    let records = records(&file);
    assert_eq!(job_numbers(&compile("(owner ~= /abc/)"), &records), vec![3]);
    assert!(job_numbers(&compile("(owner *= abc)"), &records).is_empty());
    assert_eq!(job_numbers(&compile("(qname *= *.Q)"), &records), vec![1, 2, 3]);
}

#[test]
fn test_regex_ignore_case_flag() {
    let file = accounting_file();
    let records = records(&file);
    assert_eq!(job_numbers(&compile("(owner ~= #j.*smith#I)"), &records), vec![1]);
    assert!(job_numbers(&compile("(owner ~= #j.*smith#)"), &records).is_empty());
}

#[test]
fn test_malformed_and_unknown_fail_before_reading() {
    let schemas = Schemas::new().unwrap();
    assert!(matches!(
        parse_filter("(and (owner = bob)", schemas.extended()),
        Err(AcctError::Parse { .. })
    ));
    assert!(matches!(
        parse_filter("(not_a_field = 1)", schemas.extended()),
        Err(AcctError::UnknownField { .. })
    ));
}

#[test]
fn test_bad_literal_is_per_record_error() {
    let file = accounting_file();
    let records = records(&file);
    let filter = compile("(slots > many)");
    assert!(matches!(
        filter.matches(&records[0]),
        Err(AcctError::LiteralCoercion { .. })
    ));
}

#[test]
fn test_option_surface_matches_expression() {
    let file = accounting_file();
    let records = records(&file);
    let from_options = parse_options(&["--queue", "main.q", "--not", "--slots", "2..", "--ge"]).unwrap();
    let from_text = compile("(and (qname *= main.q) (not (or (and (slots >= 2)))))");
    assert_eq!(
        job_numbers(&from_options, &records),
        job_numbers(&from_text, &records)
    );
    assert_eq!(job_numbers(&from_options, &records), vec![3]);
    assert_eq!(
        from_options.to_string(),
        "(and (qname *= main.q) (not (or (slots >= 2))))"
    );
}

#[test]
fn test_derived_fields_and_template() {
    let file = accounting_file();
    let records = records(&file);
    assert_eq!(
        job_numbers(&compile("(waiting_time_sec = 60)"), &records),
        vec![1, 2, 3]
    );
    let schemas = Schemas::new().unwrap();
    let template = Template::parse(
        "{job_number} {owner} {waiting_time} {end_time:%H:%M}",
        schemas.extended(),
    )
    .unwrap();
    assert_eq!(template.render(&records[1]).unwrap(), "2 alice 0:01:00 01:00");
}
