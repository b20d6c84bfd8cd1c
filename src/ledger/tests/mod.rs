mod tests_epochs;
