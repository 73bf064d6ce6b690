mod cycle_test;
