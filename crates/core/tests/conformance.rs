//! Runs the `DataStore` conformance suite against both adapters.
//!
//! Every suite function runs twice, once per backend, from a fresh engine.
//! Configuration differences live here; the contract assertions live in
//! `duostore_core::conformance`.

use duostore_core::{conformance, testutil, CreateIdOption, DataStoreOptions};

fn auto() -> DataStoreOptions {
    DataStoreOptions::default()
}

fn manual() -> DataStoreOptions {
    DataStoreOptions::builder()
        .create_id_option(CreateIdOption::ManualRejectIdConflicts)
        .build()
}

fn allow_conflicts() -> DataStoreOptions {
    DataStoreOptions::builder()
        .create_id_option(CreateIdOption::ManualAllowIdConflicts)
        .build()
}

fn upsert() -> DataStoreOptions {
    DataStoreOptions::builder().create_if_not_exists(true).build()
}

fn read_only_owner() -> DataStoreOptions {
    DataStoreOptions::builder()
        .create_id_option(CreateIdOption::ManualRejectIdConflicts)
        .read_only_fields(["owner"])
        .build()
}

fn transactional() -> DataStoreOptions {
    DataStoreOptions::builder()
        .require_transaction(true)
        .create_if_not_exists(true)
        .build()
}

macro_rules! both_backends {
    ($($test:ident with $options:expr;)+) => {
        $(
            mod $test {
                use super::*;

                #[tokio::test]
                async fn document() {
                    conformance::$test(&testutil::document_store($options)).await;
                }

                #[tokio::test]
                async fn tree() {
                    conformance::$test(&testutil::tree_store($options)).await;
                }
            }
        )+
    };
}

both_backends! {
    crud_create_then_read_round_trips with auto();
    crud_read_missing_is_not_found with auto();
    crud_create_with_id_then_read with manual();
    crud_delete_returns_previous_and_removes with manual();
    crud_delete_missing_is_not_found with auto();

    idpolicy_auto_rejects_manual_create with auto();
    idpolicy_manual_rejects_auto_create with manual();
    idpolicy_reject_conflicts_fails_fast with manual();
    idpolicy_allow_conflicts_suffixes with allow_conflicts();
    idpolicy_suffix_exhaustion_fails with allow_conflicts();
    idpolicy_invalid_id_is_invalid_parameters with manual();
    idpolicy_callback_failure_rolls_back_claim with manual();
    idpolicy_callback_sees_claimed_record with manual();

    update_merges_and_returns_previous with manual();
    update_missing_is_not_found with manual();
    update_upserts_when_configured with upsert();
    update_read_only_field_is_invalid_data with read_only_owner();
    update_rejected_under_transactional_config with transactional();
    transactional_update_rejected_under_plain_config with manual();
    transactional_update_merges with transactional();
    transactional_callback_failure_rolls_back with transactional();

    validation_null_rejected_by_default with auto();
    validation_reserved_id_key_rejected with auto();
    validation_shape_mismatch_rejected with auto();

    query_counts_and_windows with manual();
    query_descending_reverses_ascending with manual();
    query_windows_concatenate with manual();
    query_equality_filter_on_sort_field with manual();
    query_range_filter_on_sort_field with manual();
    query_cursor_continuation_is_consistent with manual();
    query_stale_cursor_is_discarded with manual();
    query_hostile_cursor_positions_are_tolerated with manual();
    query_range_clamps_to_total with manual();
    query_empty_set_echoes_degenerate_range with manual();
    query_malformed_inputs_are_invalid_parameters with manual();
}
